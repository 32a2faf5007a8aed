//! These modules are shared between the audio side and the network side of an endpoint.
use std::time::{SystemTime, UNIX_EPOCH};

pub mod audio_packet;
pub mod box_error;
pub mod config;
pub mod sample_codec;
pub mod stream_stats;

/// microseconds since the epoch.  Used to timestamp packet arrivals and to drive timers.
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros()
}
