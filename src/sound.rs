//! components used to build the audio side of an endpoint
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use log::warn;
use serde::Serialize;
use serde_json::json;

use crate::common::box_error::BoxError;
use crate::common::config::{BufferStrategy, SessionConfig, MAX_POOL_FRAMES};

pub mod audio_tester;
pub mod link_engine;
pub mod monitor;
pub mod plc;
pub mod plugin;
pub mod pool_buffer;
pub mod queue_buffer;

/// where the input callback hands its encoded packets.  Implementations must
/// not block; the expectation is an SPSC queue drained by a transmit thread.
pub trait TransmitSink {
    fn send(&mut self, packet: &[u8]) -> ();
}

/// [`TransmitSink`] backed by a bounded channel.  A full queue drops the
/// packet and counts it instead of blocking the audio thread.
pub struct ChannelSink {
    tx: mpsc::SyncSender<Vec<u8>>,
    sent: u64,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(depth: usize) -> (ChannelSink, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::sync_channel(depth);
        (
            ChannelSink {
                tx,
                sent: 0,
                dropped: 0,
            },
            rx,
        )
    }
    pub fn get_sent(&self) -> u64 {
        self.sent
    }
    pub fn get_dropped(&self) -> u64 {
        self.dropped
    }
}

impl TransmitSink for ChannelSink {
    fn send(&mut self, packet: &[u8]) -> () {
        match self.tx.try_send(packet.to_vec()) {
            Ok(()) => self.sent += 1,
            Err(_) => self.dropped += 1, // transmit thread is behind
        }
    }
}

/// jitter buffer contract shared by both strategies.
///
/// push comes from the network receive thread, pull from the audio output
/// callback, so both take &self and synchronize internally with one short
/// critical section.
pub trait PacketBuffer {
    /// store a received packet under its 16 bit sequence number
    fn push(&self, packet: &[u8], seq: u16) -> bool;
    /// fill out with the next block to play.  Never fails; concealment and
    /// silence cover for whatever the network didn't deliver.
    fn pull(&self, out: &mut [u8]) -> ();
    /// read only counter snapshot for the outer tuning loop
    fn snapshot_stats(&self) -> BufferStats;
}

/// counters a buffer exposes.  The buffer itself never consults these.
#[derive(Clone, Debug, Serialize)]
pub struct BufferStats {
    pub strategy: &'static str,
    pub queue_length: usize,
    pub loss_count: u64,
    pub glitch_count: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub interval_mean_ms: f64,
    pub interval_min_ms: f64,
    pub interval_max_ms: f64,
    pub interval_std_dev_ms: f64,
    pub interval_avg_std_dev_ms: f64,
}

impl BufferStats {
    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "strategy": self.strategy,
            "queueLength": self.queue_length,
            "lost": self.loss_count,
            "glitches": self.glitch_count,
            "underruns": self.underruns,
            "overruns": self.overruns,
            "interval": {
                "mean": self.interval_mean_ms,
                "min": self.interval_min_ms,
                "max": self.interval_max_ms,
                "stdDev": self.interval_std_dev_ms,
                "avgStdDev": self.interval_avg_std_dev_ms,
            },
        })
    }
}

impl fmt::Display for BufferStats {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:>10} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>7} {:>7} {:>5} {:>6}",
            self.strategy,
            self.interval_mean_ms,
            self.interval_min_ms,
            self.interval_max_ms,
            self.interval_std_dev_ms,
            self.interval_avg_std_dev_ms,
            self.glitch_count,
            self.loss_count,
            self.queue_length,
            self.underruns,
        )
    }
}

/// build the jitter buffer called for by the config.  The pool strategy is
/// only validated up to 256 frame blocks; past that we quietly run the queue
/// strategy instead.
pub fn build_buffer(
    config: &SessionConfig,
) -> Result<Arc<dyn PacketBuffer + Send + Sync>, BoxError> {
    config.validate()?;
    let strategy = match config.strategy {
        BufferStrategy::Pool if config.frames > MAX_POOL_FRAMES => {
            warn!(
                "pool strategy not validated for {} frame blocks, using queue",
                config.frames
            );
            BufferStrategy::Queue
        }
        s => s,
    };
    match strategy {
        BufferStrategy::Queue => Ok(Arc::new(queue_buffer::QueueBuffer::new(config))),
        BufferStrategy::Pool => Ok(Arc::new(pool_buffer::PoolBuffer::new(config))),
    }
}

#[cfg(test)]
mod test_sound {
    use super::*;

    #[test]
    fn sink_counts_drops() {
        // a full channel drops instead of blocking
        let (mut sink, _rx) = ChannelSink::new(2);
        sink.send(&[1, 2, 3]);
        sink.send(&[4, 5, 6]);
        sink.send(&[7, 8, 9]);
        assert_eq!(sink.get_sent(), 2);
        assert_eq!(sink.get_dropped(), 1);
    }

    #[test]
    fn factory_honors_strategy() {
        let mut config = SessionConfig::default();
        config.strategy = BufferStrategy::Queue;
        let buf = build_buffer(&config).unwrap();
        assert_eq!(buf.snapshot_stats().strategy, "queue");

        config.strategy = BufferStrategy::Pool;
        let buf = build_buffer(&config).unwrap();
        assert_eq!(buf.snapshot_stats().strategy, "pool");
    }

    #[test]
    fn factory_falls_back_on_big_blocks() {
        // pool concealment is unvalidated past 256 frames
        let mut config = SessionConfig::default();
        config.strategy = BufferStrategy::Pool;
        config.frames = 512;
        let buf = build_buffer(&config).unwrap();
        assert_eq!(buf.snapshot_stats().strategy, "queue");
    }
}
