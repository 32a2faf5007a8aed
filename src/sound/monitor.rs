//! double buffered hand-off of captured audio to the playback callback.
//!
//! The input callback writes a copy of its (processed) capture block into
//! whichever bank is not currently published, then publishes that bank's
//! index with a release store.  The output callback loads the index with
//! acquire and mixes from that bank.  The release/acquire pair is what makes
//! every sample written before the publish visible to the reader.
//!
//! There is at most one writer and one reader.  Each bank carries a try-lock
//! so a reader that is still holding a bank when the writer comes back
//! around can never observe it half written; the writer skips that publish
//! and counts it instead of waiting.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A/B banks of per channel frame buffers
pub struct MonitorBuffer {
    banks: [Mutex<Vec<Vec<f32>>>; 2],
    ready: AtomicUsize,
    publishes: AtomicU64,
    drops: AtomicU64,
}

impl MonitorBuffer {
    pub fn new(channels: usize, frames: usize) -> MonitorBuffer {
        MonitorBuffer {
            banks: [
                Mutex::new(vec![vec![0.0; frames]; channels]),
                Mutex::new(vec![vec![0.0; frames]; channels]),
            ],
            ready: AtomicUsize::new(0),
            publishes: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// writer side: copy chans into the spare bank and publish it.
    /// mono_source collapses the copy to channel zero for every bank channel
    /// (used for mono and mix-to-mono input).
    pub fn publish(&self, chans: &[&[f32]], frames: usize, mono_source: bool) -> () {
        let spare = 1 - self.ready.load(Ordering::Relaxed);
        match self.banks[spare].try_lock() {
            Ok(mut bank) => {
                for (i, buf) in bank.iter_mut().enumerate() {
                    // a bank wider than the capture set repeats the last
                    // capture channel
                    let src = if mono_source {
                        chans[0]
                    } else {
                        chans[i.min(chans.len() - 1)]
                    };
                    buf[..frames].copy_from_slice(&src[..frames]);
                }
                drop(bank);
                self.ready.store(spare, Ordering::Release);
                self.publishes.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // reader still on that bank; drop this block rather than wait
                self.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// reader side: run f over the most recently published bank
    pub fn with_ready<R>(&self, f: impl FnOnce(&[Vec<f32>]) -> R) -> Option<R> {
        let idx = self.ready.load(Ordering::Acquire);
        match self.banks[idx].try_lock() {
            Ok(bank) => Some(f(&bank)),
            Err(_) => None, // writer got there first; skip this tick
        }
    }

    pub fn get_publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }
    pub fn get_drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}
