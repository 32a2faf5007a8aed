//! stateless conversion between normalized f32 samples and packed little
//! endian integer encodings of 8, 16, 24 or 32 bits.
//!
//! This is the only place that knows the wire representation of a sample.
//! The 24 bit format splits the value into a signed 16 bit part and an
//! unsigned 8 bit residual, laid out [low16 | residual8].  The split uses
//! floor on purpose: existing peers expect that exact bit pattern, so a
//! rounding encoder would not interoperate.
//!
//! Conversion can never fail.  Out of range input is clamped silently.
use byteorder::{ByteOrder, LittleEndian};

/// sample width on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum BitDepth {
    Bit8,
    Bit16,
    Bit24,
    Bit32,
}

impl BitDepth {
    /// bytes one encoded sample occupies
    pub fn bytes(&self) -> usize {
        match self {
            BitDepth::Bit8 => 1,
            BitDepth::Bit16 => 2,
            BitDepth::Bit24 => 3,
            BitDepth::Bit32 => 4,
        }
    }
    /// parse the configured bit resolution
    pub fn from_bits(bits: u32) -> Option<BitDepth> {
        match bits {
            8 => Some(BitDepth::Bit8),
            16 => Some(BitDepth::Bit16),
            24 => Some(BitDepth::Bit24),
            32 => Some(BitDepth::Bit32),
            _ => None,
        }
    }
}

/// byte offset of (frame j, channel c) in an interleaved packet.  channel is
/// the minor axis.  Both directions use this one layout.
pub fn byte_offset(frame: usize, channel: usize, channels: usize, width: BitDepth) -> usize {
    (frame * channels + channel) * width.bytes()
}

/// encode one sample into out, which must be exactly width.bytes() long
pub fn encode_sample(sample: f32, width: BitDepth, out: &mut [u8]) -> () {
    match width {
        BitDepth::Bit8 => {
            // 8 bit integer between -127 and 127
            let q = (f64::from(sample) * 127.0).round().clamp(-127.0, 127.0);
            out[0] = (q as i8) as u8;
        }
        BitDepth::Bit16 => {
            // 16 bit integer between -32767 and 32767
            let q = (f64::from(sample) * 32767.0).round().clamp(-32767.0, 32767.0);
            LittleEndian::write_i16(out, q as i16);
        }
        BitDepth::Bit24 => {
            // quantize to 16 bits first, then pack the positive remainder
            // into an unsigned byte
            let q = f64::from(sample) * 32768.0;
            let low = q.floor().clamp(-32768.0, 32767.0);
            let residual = ((q - low) * 256.0).floor().clamp(0.0, 255.0);
            LittleEndian::write_i16(&mut out[0..2], low as i16);
            out[2] = residual as u8;
        }
        BitDepth::Bit32 => {
            LittleEndian::write_f32(out, sample);
        }
    }
}

/// decode one sample from bytes, which must be exactly width.bytes() long
pub fn decode_sample(bytes: &[u8], width: BitDepth) -> f32 {
    match width {
        BitDepth::Bit8 => (bytes[0] as i8) as f32 / 128.0,
        BitDepth::Bit16 => LittleEndian::read_i16(bytes) as f32 / 32768.0,
        BitDepth::Bit24 => {
            let low = LittleEndian::read_i16(&bytes[0..2]) as f32;
            let residual = bytes[2] as f32 / 256.0;
            (low + residual) / 32768.0
        }
        BitDepth::Bit32 => LittleEndian::read_f32(bytes),
    }
}

/// encode per channel buffers into an interleaved packet payload
pub fn encode_frame(chans: &[&[f32]], frames: usize, width: BitDepth, out: &mut [u8]) -> () {
    let nchan = chans.len();
    let w = width.bytes();
    for j in 0..frames {
        for (c, chan) in chans.iter().enumerate() {
            let off = byte_offset(j, c, nchan, width);
            encode_sample(chan[j], width, &mut out[off..off + w]);
        }
    }
}

/// decode an interleaved packet payload into per channel buffers
pub fn decode_frame(payload: &[u8], frames: usize, width: BitDepth, chans: &mut [&mut [f32]]) -> () {
    let nchan = chans.len();
    let w = width.bytes();
    for j in 0..frames {
        for c in 0..nchan {
            let off = byte_offset(j, c, nchan, width);
            chans[c][j] = decode_sample(&payload[off..off + w], width);
        }
    }
}
