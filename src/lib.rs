//! pcmlink - point to point real time audio streaming
//!
//! provides the receive side jitter buffering (with packet loss concealment),
//! the sample/packet codec, and the audio callback engine used to build a
//! low latency PCM streaming endpoint on top of an unreliable datagram link.
//! Socket handling and audio device drivers are the caller's problem.
extern crate json;

pub mod common;
pub mod dsp;
pub mod sound;
pub mod utils;
