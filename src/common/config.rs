//! session configuration for an endpoint.
//!
//! Everything the engine needs to know is decided here, validated once, and
//! then handed in at build time.  Nothing in the real time path ever looks
//! at a config file or a global.  A settings.json next to the executable can
//! override the defaults, mostly so local testing doesn't need code changes.
use std::fmt;

use serde::{Deserialize, Serialize};
use simple_error::bail;

use super::box_error::BoxError;
use super::sample_codec::BitDepth;

/// sample rates the endpoint will agree to run at
pub const SUPPORTED_RATES: [u32; 7] = [22050, 32000, 44100, 48000, 88200, 96000, 192000];

/// block sizes the endpoint will agree to run at
pub const MIN_FRAMES: usize = 16;
pub const MAX_FRAMES: usize = 1024;

/// the pool strategy is only validated up to this block size; larger blocks
/// fall back to the queue strategy
pub const MAX_POOL_FRAMES: usize = 256;

/// how the input device channels map onto the network stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum InputMixMode {
    Mono,
    Stereo,
    /// two device channels pre-mixed to one by the device adapter
    MixToMono,
}

/// what the queue strategy plays when it has nothing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum UnderrunPolicy {
    Zeros,
    /// replay the last delivered packet as a wavetable
    Replay,
}

/// which jitter buffer implementation to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum BufferStrategy {
    Queue,
    Pool,
}

/// the complete knob set for one endpoint session
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub bit_depth: BitDepth,
    /// frames per device callback (N)
    pub frames: usize,
    /// nominal latency target in packets (Q)
    pub queue_length: usize,
    pub channels_in: usize,
    pub channels_out: usize,
    pub mix_mode: InputMixMode,
    pub underrun_policy: UnderrunPolicy,
    pub strategy: BufferStrategy,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            sample_rate: 48000,
            bit_depth: BitDepth::Bit16,
            frames: 64,
            queue_length: 4,
            channels_in: 2,
            channels_out: 2,
            mix_mode: InputMixMode::Stereo,
            underrun_policy: UnderrunPolicy::Zeros,
            strategy: BufferStrategy::Pool,
        }
    }
}

impl SessionConfig {
    /// channels actually put on the wire by the input side
    pub fn net_channels_in(&self) -> usize {
        match self.mix_mode {
            InputMixMode::MixToMono => 1,
            _ => self.channels_in,
        }
    }
    /// duration of one packet in msec
    pub fn packet_duration_ms(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64 * 1000.0
    }
    /// check every knob.  Anything off is a fatal setup diagnostic; there is
    /// no partial acceptance.
    pub fn validate(&self) -> Result<(), BoxError> {
        if !SUPPORTED_RATES.contains(&self.sample_rate) {
            bail!("unsupported sample rate {}", self.sample_rate);
        }
        if self.frames < MIN_FRAMES || self.frames > MAX_FRAMES {
            bail!(
                "frames per callback {} outside [{}, {}]",
                self.frames,
                MIN_FRAMES,
                MAX_FRAMES
            );
        }
        if self.queue_length < 1 {
            bail!("queue length must be at least 1 packet");
        }
        if self.channels_in < 1 || self.channels_out < 1 {
            bail!(
                "need at least one channel each way (got in: {}, out: {})",
                self.channels_in,
                self.channels_out
            );
        }
        if self.mix_mode == InputMixMode::MixToMono && self.channels_in != 2 {
            bail!("mix-to-mono requires exactly two input channels");
        }
        Ok(())
    }

    /// Apply overrides from a settings.json style file.  A missing file just
    /// means defaults; a present file only overrides the keys it has.
    pub fn load_overrides(&mut self, filename: &str) -> Result<(), BoxError> {
        let raw = match std::fs::read_to_string(filename) {
            Ok(data) => data,
            Err(_) => return Ok(()), // no file, no overrides
        };
        let parsed = json::parse(&raw)?;
        if let Some(v) = parsed["sample_rate"].as_u32() {
            self.sample_rate = v;
        }
        if let Some(v) = parsed["bit_resolution"].as_u32() {
            match BitDepth::from_bits(v) {
                Some(depth) => self.bit_depth = depth,
                None => bail!("bit_resolution {} is not one of 8/16/24/32", v),
            }
        }
        if let Some(v) = parsed["frames"].as_u32() {
            self.frames = v as usize;
        }
        if let Some(v) = parsed["queue_length"].as_u32() {
            self.queue_length = v as usize;
        }
        if let Some(v) = parsed["channels_in"].as_u32() {
            self.channels_in = v as usize;
        }
        if let Some(v) = parsed["channels_out"].as_u32() {
            self.channels_out = v as usize;
        }
        if let Some(v) = parsed["strategy"].as_str() {
            match v {
                "queue" => self.strategy = BufferStrategy::Queue,
                "pool" => self.strategy = BufferStrategy::Pool,
                _ => bail!("strategy '{}' is not queue or pool", v),
            }
        }
        if let Some(v) = parsed["underrun_policy"].as_str() {
            match v {
                "zeros" => self.underrun_policy = UnderrunPolicy::Zeros,
                "wave-table-replay" => self.underrun_policy = UnderrunPolicy::Replay,
                _ => bail!("underrun_policy '{}' is not zeros or wave-table-replay", v),
            }
        }
        if let Some(v) = parsed["input_mix_mode"].as_str() {
            match v {
                "mono" => self.mix_mode = InputMixMode::Mono,
                "stereo" => self.mix_mode = InputMixMode::Stereo,
                "mix-to-mono" => self.mix_mode = InputMixMode::MixToMono,
                _ => bail!("input_mix_mode '{}' is not mono/stereo/mix-to-mono", v),
            }
        }
        Ok(())
    }
}

impl fmt::Display for SessionConfig {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ rate: {}, bits: {}, frames: {}, q: {}, in: {}, out: {}, strategy: {:?} }}",
            self.sample_rate,
            self.bit_depth.bytes() * 8,
            self.frames,
            self.queue_length,
            self.channels_in,
            self.channels_out,
            self.strategy
        )
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    #[test]
    fn default_validates() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
    }
    #[test]
    fn rejects_weird_rate() {
        let mut config = SessionConfig::default();
        config.sample_rate = 44056;
        assert!(config.validate().is_err());
    }
    #[test]
    fn rejects_tiny_blocks() {
        let mut config = SessionConfig::default();
        config.frames = 8;
        assert!(config.validate().is_err());
        config.frames = 2048;
        assert!(config.validate().is_err());
    }
    #[test]
    fn rejects_zero_queue() {
        let mut config = SessionConfig::default();
        config.queue_length = 0;
        assert!(config.validate().is_err());
    }
    #[test]
    fn mix_to_mono_needs_stereo_in() {
        let mut config = SessionConfig::default();
        config.mix_mode = InputMixMode::MixToMono;
        config.channels_in = 1;
        assert!(config.validate().is_err());
        config.channels_in = 2;
        assert!(config.validate().is_ok());
        assert_eq!(config.net_channels_in(), 1);
    }
    #[test]
    fn packet_duration() {
        let config = SessionConfig::default();
        // 64 frames at 48k is a third of 4 msec
        assert!((config.packet_duration_ms() - 64.0 / 48.0).abs() < 1e-9);
    }
    #[test]
    fn missing_override_file_is_fine() {
        let mut config = SessionConfig::default();
        assert!(config
            .load_overrides("no_such_settings_file.json")
            .is_ok());
        assert_eq!(config.sample_rate, 48000);
    }
}
