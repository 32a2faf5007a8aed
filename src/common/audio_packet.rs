//! chunk of bytes that holds one callback block of audio
//!
//! This is the payload that goes on the wire.  It is very intentionally
//! simple: no header, no magic, just the interleaved samples of one block.
//! The datagram layer owns whatever framing it needs (including where the
//! sequence number travels); the core only sees payload plus a 16 bit seq.
use std::fmt;

use simple_error::bail;

use super::box_error::BoxError;
use super::sample_codec::{decode_frame, encode_frame, BitDepth};

/// sequence numbers wrap at 2^16
pub const SEQ_MOD: u32 = 65536;

/// the next sequence number after seq
pub fn seq_next(seq: u16) -> u16 {
    seq.wrapping_add(1)
}

/// how many packets ahead b is of a, in modular arithmetic.  A result of
/// zero means equal; results past 2^15 mean b is actually behind a.
pub fn seq_gap(a: u16, b: u16) -> u16 {
    b.wrapping_sub(a)
}

/// true if b is ahead of a but by less than half the sequence space
pub fn seq_ahead(a: u16, b: u16) -> bool {
    let gap = seq_gap(a, b);
    gap != 0 && gap < (SEQ_MOD / 2) as u16
}

/// dimensions of every packet in a session.  Fixed for the session lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketShape {
    pub frames: usize,
    pub channels: usize,
    pub width: BitDepth,
}

impl PacketShape {
    /// payload size in bytes
    pub fn bytes(&self) -> usize {
        self.frames * self.channels * self.width.bytes()
    }
}

/// one encoded block of audio
pub struct AudioPacket {
    shape: PacketShape,
    buffer: Vec<u8>,
}

impl AudioPacket {
    pub fn new(shape: PacketShape) -> AudioPacket {
        AudioPacket {
            shape,
            buffer: vec![0; shape.bytes()],
        }
    }
    pub fn shape(&self) -> PacketShape {
        self.shape
    }
    /// Get the payload (used for handing to the transmit sink)
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }
    /// Get the payload as a write target (used by the jitter buffer pull)
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
    /// load a payload received from the wire.  Anything that is not exactly
    /// one block is a framing bug in the layer above us.
    pub fn load(&mut self, data: &[u8]) -> Result<(), BoxError> {
        if data.len() != self.buffer.len() {
            bail!(
                "payload size {} does not match packet shape {}",
                data.len(),
                self.buffer.len()
            );
        }
        self.buffer.copy_from_slice(data);
        Ok(())
    }
    /// Encode per channel sample buffers into the payload
    pub fn encode(&mut self, chans: &[&[f32]]) -> () {
        encode_frame(chans, self.shape.frames, self.shape.width, &mut self.buffer);
    }
    /// decode the payload into per channel sample buffers
    pub fn decode(&self, chans: &mut [&mut [f32]]) -> () {
        decode_frame(&self.buffer, self.shape.frames, self.shape.width, chans);
    }
}

impl fmt::Display for AudioPacket {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ frames: {}, channels: {}, width: {}, bytes: {} }}",
            self.shape.frames,
            self.shape.channels,
            self.shape.width.bytes() * 8,
            self.buffer.len()
        )
    }
}
