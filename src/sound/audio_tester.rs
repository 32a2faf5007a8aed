//! round trip latency measurement over the live stream.
//!
//! When enabled, the input callback periodically replaces the last capture
//! channel with a single impulse and stamps the send time.  The far end (or
//! a local loopback) eventually plays it back, the output callback spots it
//! by frame power, and the elapsed time becomes a smoothed round trip
//! estimate.  State is a handful of atomics so the two callbacks can share
//! it without a lock even when they live on different threads.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::utils::get_frame_power_in_db;

// send a pulse every half second of stream time
const PULSE_INTERVAL_US: u64 = 500_000;
// what still counts as hearing our own pulse
const DETECT_THRESHOLD_DB: f64 = -30.0;
// smoothing weight for the running estimate
const EMA_WEIGHT: f64 = 0.3;

pub const PULSE_AMPLITUDE: f32 = 0.5;

pub struct AudioTester {
    enabled: AtomicBool,
    sent_at_us: AtomicU64, // 0 means no pulse in flight
    last_send_us: AtomicU64,
    roundtrip_ms_bits: AtomicU64,
    pulses_sent: AtomicU64,
    pulses_found: AtomicU64,
}

impl AudioTester {
    pub fn new() -> AudioTester {
        AudioTester {
            enabled: AtomicBool::new(false),
            sent_at_us: AtomicU64::new(0),
            last_send_us: AtomicU64::new(0),
            roundtrip_ms_bits: AtomicU64::new(0f64.to_bits()),
            pulses_sent: AtomicU64::new(0),
            pulses_found: AtomicU64::new(0),
        }
    }
    pub fn set_enabled(&self, on: bool) -> () {
        self.enabled.store(on, Ordering::Relaxed);
    }
    pub fn get_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
    pub fn get_roundtrip_ms(&self) -> f64 {
        f64::from_bits(self.roundtrip_ms_bits.load(Ordering::Relaxed))
    }
    pub fn get_pulses_sent(&self) -> u64 {
        self.pulses_sent.load(Ordering::Relaxed)
    }
    pub fn get_pulses_found(&self) -> u64 {
        self.pulses_found.load(Ordering::Relaxed)
    }

    /// input side: maybe overwrite chan with a fresh pulse
    pub fn write_impulse(&self, chan: &mut [f32], now_us: u128) -> () {
        if !self.get_enabled() {
            return;
        }
        let now = now_us as u64;
        if now.saturating_sub(self.last_send_us.load(Ordering::Relaxed)) < PULSE_INTERVAL_US {
            return;
        }
        chan.fill(0.0);
        if !chan.is_empty() {
            chan[0] = PULSE_AMPLITUDE;
        }
        self.last_send_us.store(now, Ordering::Relaxed);
        self.sent_at_us.store(now, Ordering::Release);
        self.pulses_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// output side: scan chan for a returning pulse
    pub fn look_for_pulse(&self, chan: &[f32], now_us: u128) -> () {
        if !self.get_enabled() {
            return;
        }
        let sent = self.sent_at_us.load(Ordering::Acquire);
        if sent == 0 {
            return; // nothing in flight
        }
        if get_frame_power_in_db(chan) < DETECT_THRESHOLD_DB {
            return;
        }
        let elapsed_ms = (now_us as u64).saturating_sub(sent) as f64 / 1000.0;
        let old = self.get_roundtrip_ms();
        let smoothed = if old == 0.0 {
            elapsed_ms
        } else {
            old + EMA_WEIGHT * (elapsed_ms - old)
        };
        self.roundtrip_ms_bits
            .store(smoothed.to_bits(), Ordering::Relaxed);
        self.sent_at_us.store(0, Ordering::Release);
        self.pulses_found.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test_audio_tester {
    use super::*;

    #[test]
    fn disabled_does_nothing() {
        let tester = AudioTester::new();
        let mut chan = vec![0.25f32; 32];
        tester.write_impulse(&mut chan, 1_000_000);
        assert_eq!(chan[0], 0.25);
        assert_eq!(tester.get_pulses_sent(), 0);
    }

    #[test]
    fn pulse_round_trip() {
        let tester = AudioTester::new();
        tester.set_enabled(true);
        let mut chan = vec![0.0f32; 32];
        tester.write_impulse(&mut chan, 1_000_000);
        assert_eq!(tester.get_pulses_sent(), 1);
        assert_eq!(chan[0], PULSE_AMPLITUDE);

        // the block comes back 12 msec later
        tester.look_for_pulse(&chan, 1_012_000);
        assert_eq!(tester.get_pulses_found(), 1);
        assert!((tester.get_roundtrip_ms() - 12.0).abs() < 0.01);
    }

    #[test]
    fn quiet_blocks_are_ignored() {
        let tester = AudioTester::new();
        tester.set_enabled(true);
        let mut chan = vec![0.0f32; 32];
        tester.write_impulse(&mut chan, 1_000_000);
        let silent = vec![0.0001f32; 32];
        tester.look_for_pulse(&silent, 1_005_000);
        assert_eq!(tester.get_pulses_found(), 0);
    }

    #[test]
    fn pulses_are_rate_limited() {
        let tester = AudioTester::new();
        tester.set_enabled(true);
        let mut chan = vec![0.0f32; 32];
        tester.write_impulse(&mut chan, 1_000_000);
        let mut chan2 = vec![0.7f32; 32];
        tester.write_impulse(&mut chan2, 1_100_000); // only 100 msec later
        assert_eq!(tester.get_pulses_sent(), 1);
        assert_eq!(chan2[0], 0.7); // untouched
    }
}
