//! statistics and pacing for the packet stream.
//!
//! [`IntervalStats`](IntervalStats) watches the inter-packet arrival interval
//! and produces the per window mean/min/max/stddev numbers that the outer
//! buffer tuning loop reads.  [`DepthStat`](DepthStat) keeps a running spread
//! of jitter buffer depth as seen by the pull side.  [`Throttle`](Throttle)
//! paces periodic low-priority work, like status events, off the audio clock.
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// running mean and spread over a circular sample window.
///
/// The queue buffer feeds it the depth observed at every pull.  Bookkeeping
/// is a ring plus running sum and sum of squares, so adding a sample is a
/// handful of arithmetic no matter how wide the window is.
#[derive(Debug, Deserialize, Serialize)]
pub struct DepthStat {
    ring: Vec<f64>,
    at: usize,
    filled: usize,
    sum: f64,
    sum_sq: f64,
}

impl DepthStat {
    pub fn new(window: usize) -> DepthStat {
        DepthStat {
            ring: vec![0.0; window],
            at: 0,
            filled: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
    pub fn add_sample(&mut self, v: f64) -> () {
        let old = self.ring[self.at];
        self.ring[self.at] = v;
        self.at = (self.at + 1) % self.ring.len();
        if self.filled < self.ring.len() {
            self.filled += 1;
        } else {
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        self.sum += v;
        self.sum_sq += v * v;
    }
    /// mean over the samples actually seen so far
    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.sum / self.filled as f64
    }
    /// standard deviation over the window
    pub fn spread(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.sum_sq / self.filled as f64 - mean * mean;
        var.max(0.0).sqrt() // rounding can push the variance a hair negative
    }
    pub fn window(&self) -> usize {
        self.ring.len()
    }
}

impl fmt::Display for DepthStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ mean: {:.2}, spread: {:.2}, window: {} }}",
            self.mean(),
            self.spread(),
            self.window()
        )
    }
}


/// windowed interval statistics.
///
/// Call tick with the current time in msec on every packet arrival.  At the
/// end of each window the mean/min/max/stddev of the intervals inside it are
/// latched, and the stddev feeds a long term running average.
#[derive(Debug, Deserialize, Serialize)]
pub struct IntervalStats {
    window: usize,
    data: Vec<f64>,
    ctr: usize,
    acc: f64,
    min: f64,
    max: f64,
    last_time: f64,
    last_mean: f64,
    last_min: f64,
    last_max: f64,
    last_std_dev: f64,
    long_term_std_dev: f64,
    long_term_acc: f64,
    long_term_cnt: u64,
}

impl IntervalStats {
    pub fn new(window: usize) -> IntervalStats {
        IntervalStats {
            window,
            data: vec![0.0; window],
            ctr: 0,
            acc: 0.0,
            min: 999999.0,
            max: 0.0,
            last_time: 0.0,
            last_mean: 0.0,
            last_min: 0.0,
            last_max: 0.0,
            last_std_dev: 0.0,
            long_term_std_dev: 0.0,
            long_term_acc: 0.0,
            long_term_cnt: 0,
        }
    }
    /// feed an arrival.  now_ms is a monotonic msec clock.
    pub fn tick(&mut self, now_ms: f64) -> () {
        let elapsed = if self.last_time == 0.0 {
            0.0
        } else {
            now_ms - self.last_time
        };
        self.last_time = now_ms;
        if self.ctr != self.window {
            self.data[self.ctr] = elapsed;
            if elapsed < self.min {
                self.min = elapsed;
            } else if elapsed > self.max {
                self.max = elapsed;
            }
            self.acc += elapsed;
            self.ctr += 1;
        } else {
            let mean = self.acc / self.window as f64;
            let mut var = 0.0;
            for v in &self.data {
                let d = v - mean;
                var += d * d;
            }
            var /= self.window as f64;
            let std_dev = var.sqrt();
            if self.long_term_cnt > 0 {
                self.long_term_acc += std_dev;
                self.long_term_std_dev = self.long_term_acc / self.long_term_cnt as f64;
            }
            self.long_term_cnt += 1;
            self.last_mean = mean;
            self.last_min = self.min;
            self.last_max = self.max;
            self.last_std_dev = std_dev;
            self.reset();
        }
    }
    fn reset(&mut self) -> () {
        self.acc = 0.0;
        self.min = 999999.0;
        self.max = 0.0;
        self.ctr = 0;
    }
    pub fn get_mean(&self) -> f64 {
        self.last_mean
    }
    pub fn get_min(&self) -> f64 {
        self.last_min
    }
    pub fn get_max(&self) -> f64 {
        self.last_max
    }
    pub fn get_std_dev(&self) -> f64 {
        self.last_std_dev
    }
    pub fn get_long_term_std_dev(&self) -> f64 {
        self.long_term_std_dev
    }
}

impl fmt::Display for IntervalStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ mean: {:.2}, min: {:.2}, max: {:.2}, stdDev: {:.2}, avgStdDev: {:.2} }}",
            self.last_mean, self.last_min, self.last_max, self.last_std_dev, self.long_term_std_dev
        )
    }
}

#[cfg(test)]
mod test_interval_stats {
    use super::*;

    #[test]
    fn steady_stream() {
        // a perfectly paced stream has stddev zero and mean equal to the pace
        let mut stats = IntervalStats::new(10);
        let mut now = 1000.0;
        for _ in 0..25 {
            stats.tick(now);
            now += 1.5;
        }
        assert!((stats.get_mean() - 1.5).abs() < 0.2); // first window holds the zero first tick
        assert!(stats.get_std_dev() < 1.0);
        assert!(stats.get_max() <= 1.5 + f64::EPSILON);
    }

    #[test]
    fn jittery_stream() {
        let mut stats = IntervalStats::new(8);
        let mut now = 0.0;
        for i in 0..40 {
            stats.tick(now);
            now += if i % 2 == 0 { 1.0 } else { 4.0 };
        }
        assert!(stats.get_std_dev() > 0.5);
        assert!(stats.get_max() >= 4.0 - f64::EPSILON);
    }
}

/// one-shot re-arming pacer with microsecond timestamps.
///
/// fire answers "is it time yet" and re-arms in the same call, so the
/// calling code stays a single if.
#[derive(Debug)]
pub struct Throttle {
    due: u128,
    interval: u128,
}

impl Throttle {
    /// first firing lands one interval after now
    pub fn new(now: u128, interval: u128) -> Throttle {
        Throttle {
            due: now + interval,
            interval,
        }
    }
    /// true when the interval has elapsed; re-arms for the next one
    pub fn fire(&mut self, now: u128) -> bool {
        if now < self.due {
            return false;
        }
        self.due = now + self.interval;
        true
    }
}

#[cfg(test)]
mod test_throttle {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut pacer = Throttle::new(1000, 100);
        assert!(!pacer.fire(1050));
        assert!(pacer.fire(1100));
        // just fired, so it holds off until another interval passes
        assert!(!pacer.fire(1101));
        assert!(pacer.fire(1250));
    }
}
