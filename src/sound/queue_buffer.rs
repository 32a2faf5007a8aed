//! fixed length FIFO jitter buffer (the baseline strategy).
//!
//! Q packet slots, strict first-in first-out in arrival order.  Latency is
//! bounded at exactly Q blocks and reordering is only absorbed while it fits
//! inside the queue.  When the reader runs dry it plays zeros or replays the
//! last packet as a wavetable, selectable at build time.  When the writer
//! runs over it throws away the oldest packet to admit the newest.
use std::fmt;
use std::sync::Mutex;

use log::debug;

use crate::common::audio_packet::{seq_ahead, seq_gap, seq_next};
use crate::common::config::{SessionConfig, UnderrunPolicy};
use crate::common::get_micro_time;
use crate::common::stream_stats::{DepthStat, IntervalStats};

use super::{BufferStats, PacketBuffer};

// interval stat window is roughly one second of packets at 48k
const STAT_WINDOW_RATE: usize = 48000;

struct QueueInner {
    slots: Vec<Vec<u8>>,
    occupied: Vec<bool>,
    head: usize, // next slot to pull
    tail: usize, // next slot to fill
    count: usize,
    last_delivered: Vec<u8>,
    have_delivered: bool,
    last_seq: Option<u16>,
    loss_count: u64,
    underruns: u64,
    overruns: u64,
    stats: IntervalStats,
    depth_stats: DepthStat,
}

/// Strategy A.  See the module doc.
pub struct QueueBuffer {
    depth: usize,
    policy: UnderrunPolicy,
    inner: Mutex<QueueInner>,
}

impl QueueBuffer {
    pub fn new(config: &SessionConfig) -> QueueBuffer {
        let bytes = config.frames * config.channels_out * config.bit_depth.bytes();
        let depth = config.queue_length;
        QueueBuffer {
            depth,
            policy: config.underrun_policy,
            inner: Mutex::new(QueueInner {
                slots: vec![vec![0; bytes]; depth],
                occupied: vec![false; depth],
                head: 0,
                tail: 0,
                count: 0,
                last_delivered: vec![0; bytes],
                have_delivered: false,
                last_seq: None,
                loss_count: 0,
                underruns: 0,
                overruns: 0,
                stats: IntervalStats::new(STAT_WINDOW_RATE / config.frames),
                depth_stats: DepthStat::new(50),
            }),
        }
    }

    /// push with an explicit clock, so tests can drive time
    pub fn push_at(&self, packet: &[u8], seq: u16, now_ms: f64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.tick(now_ms);
        if let Some(last) = inner.last_seq {
            if seq_ahead(last, seq) {
                let gap = seq_gap(seq_next(last), seq);
                if gap != 0 {
                    debug!("lost packet detected in push: got {} after {}", seq, last);
                    inner.loss_count += gap as u64;
                }
                inner.last_seq = Some(seq);
            }
        } else {
            inner.last_seq = Some(seq);
        }

        if inner.count == self.depth {
            // full: discard the oldest to admit the newest
            inner.head = (inner.head + 1) % self.depth;
            inner.count -= 1;
            inner.overruns += 1;
        }
        let tail = inner.tail;
        let n = packet.len().min(inner.slots[tail].len());
        inner.slots[tail][..n].copy_from_slice(&packet[..n]);
        inner.occupied[tail] = true;
        inner.tail = (tail + 1) % self.depth;
        inner.count += 1;
        true
    }

    /// pull with an explicit clock
    pub fn pull_at(&self, out: &mut [u8], _now_ms: f64) -> () {
        let mut inner = self.inner.lock().unwrap();
        let depth = inner.count as f64;
        inner.depth_stats.add_sample(depth); // gather depth stats
        if inner.count == 0 {
            inner.underruns += 1;
            match self.policy {
                UnderrunPolicy::Replay if inner.have_delivered => {
                    let n = out.len().min(inner.last_delivered.len());
                    out[..n].copy_from_slice(&inner.last_delivered[..n]);
                }
                _ => {
                    out.fill(0);
                }
            }
            return;
        }
        let head = inner.head;
        let n = out.len().min(inner.slots[head].len());
        out[..n].copy_from_slice(&inner.slots[head][..n]);
        inner.occupied[head] = false;
        inner.head = (head + 1) % self.depth;
        inner.count -= 1;
        // keep a wavetable for replay underruns
        inner.last_delivered[..n].copy_from_slice(&out[..n]);
        inner.have_delivered = true;
    }

    pub fn depth(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.count
    }
    /// average depth seen by recent pulls, in packets
    pub fn avg_depth(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.depth_stats.mean()
    }
}

impl PacketBuffer for QueueBuffer {
    fn push(&self, packet: &[u8], seq: u16) -> bool {
        self.push_at(packet, seq, get_micro_time() as f64 / 1000.0)
    }
    fn pull(&self, out: &mut [u8]) -> () {
        self.pull_at(out, get_micro_time() as f64 / 1000.0)
    }
    fn snapshot_stats(&self) -> BufferStats {
        let inner = self.inner.lock().unwrap();
        BufferStats {
            strategy: "queue",
            queue_length: self.depth,
            loss_count: inner.loss_count,
            glitch_count: inner.underruns,
            underruns: inner.underruns,
            overruns: inner.overruns,
            interval_mean_ms: inner.stats.get_mean(),
            interval_min_ms: inner.stats.get_min(),
            interval_max_ms: inner.stats.get_max(),
            interval_std_dev_ms: inner.stats.get_std_dev(),
            interval_avg_std_dev_ms: inner.stats.get_long_term_std_dev(),
        }
    }
}

impl fmt::Display for QueueBuffer {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        let held = inner.occupied.iter().filter(|o| **o).count();
        write!(
            f,
            "{{ depth: {}/{}, underruns: {}, overruns: {}, lost: {} }}",
            held, self.depth, inner.underruns, inner.overruns, inner.loss_count
        )
    }
}

#[cfg(test)]
mod test_queue_buffer {
    use super::*;
    use crate::common::config::BufferStrategy;

    fn config() -> SessionConfig {
        let mut c = SessionConfig::default();
        c.frames = 16;
        c.channels_out = 1;
        c.queue_length = 4;
        c.strategy = BufferStrategy::Queue;
        c
    }

    fn packet(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    #[test]
    fn fifo_order() {
        // packets come out in the order they went in
        let buf = QueueBuffer::new(&config());
        let len = 16 * 2;
        for k in 0..4u8 {
            buf.push_at(&packet(k + 1, len), k as u16, 1000.0 + k as f64);
        }
        let mut out = vec![0u8; len];
        for k in 0..4u8 {
            buf.pull_at(&mut out, 2000.0);
            assert_eq!(out, packet(k + 1, len));
        }
    }

    #[test]
    fn underrun_zeros() {
        let buf = QueueBuffer::new(&config());
        let mut out = vec![0xffu8; 16 * 2];
        buf.pull_at(&mut out, 1000.0);
        assert!(out.iter().all(|b| *b == 0));
        assert_eq!(buf.snapshot_stats().underruns, 1);
    }

    #[test]
    fn underrun_replay() {
        // wavetable mode replays the last delivered packet
        let mut c = config();
        c.underrun_policy = UnderrunPolicy::Replay;
        let buf = QueueBuffer::new(&c);
        let len = 16 * 2;
        buf.push_at(&packet(7, len), 0, 1000.0);
        let mut out = vec![0u8; len];
        buf.pull_at(&mut out, 1001.0);
        assert_eq!(out, packet(7, len));
        buf.pull_at(&mut out, 1002.0); // empty now
        assert_eq!(out, packet(7, len));
        assert_eq!(buf.snapshot_stats().underruns, 1);
    }

    #[test]
    fn overrun_discards_oldest() {
        let buf = QueueBuffer::new(&config());
        let len = 16 * 2;
        for k in 0..6u8 {
            buf.push_at(&packet(k + 1, len), k as u16, 1000.0 + k as f64);
        }
        assert_eq!(buf.snapshot_stats().overruns, 2);
        let mut out = vec![0u8; len];
        buf.pull_at(&mut out, 2000.0);
        assert_eq!(out, packet(3, len)); // 1 and 2 were discarded
    }

    #[test]
    fn loss_counting() {
        let buf = QueueBuffer::new(&config());
        let len = 16 * 2;
        buf.push_at(&packet(1, len), 0, 1000.0);
        buf.push_at(&packet(2, len), 3, 1001.0); // skipped 1 and 2
        assert_eq!(buf.snapshot_stats().loss_count, 2);
    }

    #[test]
    fn loss_counting_across_wrap() {
        let buf = QueueBuffer::new(&config());
        let len = 16 * 2;
        buf.push_at(&packet(1, len), 65535, 1000.0);
        buf.push_at(&packet(2, len), 0, 1001.0); // adjacent across the wrap
        assert_eq!(buf.snapshot_stats().loss_count, 0);
    }
}
