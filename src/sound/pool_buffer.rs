//! pool jitter buffer with packet loss concealment (the interesting strategy).
//!
//! Packets land in a pool of Q+3 slots addressed by seq mod poolsize, in
//! whatever order and at whatever time the network coughs them up.  The pull
//! side walks the sequence space at the audio clock rate: the next packet in
//! sequence is delivered as long as it is present and no older than Q blocks.
//! When it is missing, a later packet that has already aged past its Q block
//! deadline means we are running behind, so we jump forward to it and hide
//! the seam with a cross-fade.  Otherwise the Burg predictor manufactures a
//! block and the output clock never stalls.
//!
//! push is called by the network receive thread and pull by the audio output
//! callback; one short mutex section keeps the slot array and the timing
//! table consistent between them.
use std::fmt;
use std::sync::Mutex;

use log::debug;

use crate::common::audio_packet::{seq_ahead, seq_gap, seq_next, SEQ_MOD};
use crate::common::config::SessionConfig;
use crate::common::get_micro_time;
use crate::common::sample_codec::{decode_frame, encode_frame, BitDepth};
use crate::common::stream_stats::IntervalStats;

use super::plc::ChannelPlc;
use super::{BufferStats, PacketBuffer};

// the pool keeps a few slots more than the latency target so late and
// reordered packets have somewhere to land
const POOL_SLACK: usize = 3;

// interval stat window is roughly one second of packets at 48k
const STAT_WINDOW_RATE: usize = 48000;

struct PoolInner {
    slots: Vec<Vec<u8>>,
    slot_seq: Vec<Option<u16>>,
    arrival_ms: Vec<f64>,
    last_seq_in: Option<u16>,
    last_seq_out: Option<u16>,
    loss_count: u64,
    glitch_count: u64,
    resync_count: u64,
    stats: IntervalStats,
    plc: Vec<ChannelPlc>,
    truth: Vec<Vec<f32>>,
    play: Vec<Vec<f32>>,
}

/// Strategy B.  See the module doc.
pub struct PoolBuffer {
    frames: usize,
    channels: usize,
    width: BitDepth,
    qlen: usize,
    pool_size: usize,
    packet_dur_ms: f64,
    inner: Mutex<PoolInner>,
}

impl PoolBuffer {
    pub fn new(config: &SessionConfig) -> PoolBuffer {
        let frames = config.frames;
        let channels = config.channels_out;
        let width = config.bit_depth;
        let bytes = frames * channels * width.bytes();
        let pool_size = config.queue_length + POOL_SLACK;
        PoolBuffer {
            frames,
            channels,
            width,
            qlen: config.queue_length,
            pool_size,
            packet_dur_ms: config.packet_duration_ms(),
            inner: Mutex::new(PoolInner {
                slots: vec![vec![0; bytes]; pool_size],
                slot_seq: vec![None; pool_size],
                arrival_ms: vec![0.0; SEQ_MOD as usize],
                last_seq_in: None,
                last_seq_out: None,
                loss_count: 0,
                glitch_count: 0,
                resync_count: 0,
                stats: IntervalStats::new(STAT_WINDOW_RATE / frames),
                plc: (0..channels).map(|_| ChannelPlc::new(frames)).collect(),
                truth: vec![vec![0.0; frames]; channels],
                play: vec![vec![0.0; frames]; channels],
            }),
        }
    }

    /// store a packet with an explicit msec clock, so tests can drive time
    pub fn push_at(&self, packet: &[u8], seq: u16, now_ms: f64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.tick(now_ms);
        inner.arrival_ms[seq as usize] = now_ms;

        match inner.last_seq_in {
            Some(last) => {
                if seq_ahead(last, seq) {
                    let gap = seq_gap(seq_next(last), seq);
                    if gap != 0 {
                        debug!("lost packet detected in push: got {} after {}", seq, last);
                        inner.loss_count += gap as u64;
                    }
                    inner.last_seq_in = Some(seq);
                } else if seq != last {
                    // a straggler filled in a gap we already counted
                    debug!("late packet {} after {}", seq, last);
                    inner.loss_count = inner.loss_count.saturating_sub(1);
                }
            }
            None => {
                inner.last_seq_in = Some(seq);
            }
        }

        let slot = seq as usize % self.pool_size;
        let n = packet.len().min(inner.slots[slot].len());
        inner.slots[slot][..n].copy_from_slice(&packet[..n]);
        inner.slot_seq[slot] = Some(seq);
        true
    }

    /// deliver the next block with an explicit msec clock
    pub fn pull_at(&self, out: &mut [u8], now_ms: f64) -> () {
        let mut inner = self.inner.lock().unwrap();

        let newest = match inner.last_seq_in {
            Some(s) => s,
            None => {
                // nothing has ever arrived
                out.fill(0);
                return;
            }
        };
        let last_out = match inner.last_seq_out {
            Some(s) => s,
            None => {
                // first ever pull: start the stream at the oldest packet
                // that actually arrived
                let primed = Self::oldest_in_pool(&inner, newest).wrapping_sub(1);
                inner.last_seq_out = Some(primed);
                primed
            }
        };
        let target = seq_next(last_out);
        let slot = target as usize % self.pool_size;
        let fresh_after = now_ms - self.qlen as f64 * self.packet_dur_ms;

        if inner.slot_seq[slot] == Some(target)
            && inner.arrival_ms[target as usize] >= fresh_after
        {
            // the packet we wanted, on time
            self.deliver(&mut inner, slot, target, out);
            return;
        }

        // running behind?  look for a later packet past its play deadline
        if let Some((slot, seq)) = self.overdue_ahead(&inner, last_out, now_ms) {
            debug!("resync: jumping from {} to {}", last_out, seq);
            inner.resync_count += 1;
            self.deliver(&mut inner, slot, seq, out);
            return;
        }

        // nothing deliverable: synthesize and hold position
        inner.glitch_count += 1;
        self.conceal(&mut inner, out);
    }

    // the seq in the pool that is furthest behind the newest arrival
    fn oldest_in_pool(inner: &PoolInner, newest: u16) -> u16 {
        let mut best = newest;
        let mut best_gap = 0u16;
        for stored in inner.slot_seq.iter().flatten() {
            let gap = seq_gap(*stored, newest);
            if gap < (SEQ_MOD / 2) as u16 && gap > best_gap {
                best_gap = gap;
                best = *stored;
            }
        }
        best
    }

    // the nearest packet ahead of last_out whose deadline already passed
    fn overdue_ahead(
        &self,
        inner: &PoolInner,
        last_out: u16,
        now_ms: f64,
    ) -> Option<(usize, u16)> {
        let deadline = self.qlen as f64 * self.packet_dur_ms;
        let mut best: Option<(usize, u16, u16)> = None;
        for (i, stored) in inner.slot_seq.iter().enumerate() {
            if let Some(s) = stored {
                if seq_ahead(last_out, *s) && inner.arrival_ms[*s as usize] + deadline <= now_ms {
                    let gap = seq_gap(last_out, *s);
                    match best {
                        Some((_, _, g)) if g <= gap => (),
                        _ => best = Some((i, *s, gap)),
                    }
                }
            }
        }
        best.map(|(i, s, _)| (i, s))
    }

    // decode a pool slot, run it through the per channel concealment state
    // (which cross-fades if we were just predicting), re-encode to out
    fn deliver(&self, inner: &mut PoolInner, slot: usize, seq: u16, out: &mut [u8]) -> () {
        let PoolInner {
            slots,
            slot_seq,
            plc,
            truth,
            play,
            last_seq_out,
            ..
        } = inner;
        {
            let mut chans: Vec<&mut [f32]> =
                truth.iter_mut().map(|c| c.as_mut_slice()).collect();
            decode_frame(&slots[slot], self.frames, self.width, &mut chans);
        }
        for (c, state) in plc.iter_mut().enumerate() {
            state.accept(&truth[c], &mut play[c]);
        }
        let chans: Vec<&[f32]> = play.iter().map(|c| c.as_slice()).collect();
        encode_frame(&chans, self.frames, self.width, out);
        slot_seq[slot] = None;
        *last_seq_out = Some(seq);
    }

    fn conceal(&self, inner: &mut PoolInner, out: &mut [u8]) -> () {
        let PoolInner { plc, play, .. } = inner;
        for (c, state) in plc.iter_mut().enumerate() {
            state.conceal(&mut play[c]);
        }
        let chans: Vec<&[f32]> = play.iter().map(|c| c.as_slice()).collect();
        encode_frame(&chans, self.frames, self.width, out);
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl PacketBuffer for PoolBuffer {
    fn push(&self, packet: &[u8], seq: u16) -> bool {
        self.push_at(packet, seq, get_micro_time() as f64 / 1000.0)
    }
    fn pull(&self, out: &mut [u8]) -> () {
        self.pull_at(out, get_micro_time() as f64 / 1000.0)
    }
    fn snapshot_stats(&self) -> BufferStats {
        let inner = self.inner.lock().unwrap();
        BufferStats {
            strategy: "pool",
            queue_length: self.qlen,
            loss_count: inner.loss_count,
            glitch_count: inner.glitch_count,
            underruns: inner.glitch_count,
            overruns: inner.resync_count,
            interval_mean_ms: inner.stats.get_mean(),
            interval_min_ms: inner.stats.get_min(),
            interval_max_ms: inner.stats.get_max(),
            interval_std_dev_ms: inner.stats.get_std_dev(),
            interval_avg_std_dev_ms: inner.stats.get_long_term_std_dev(),
        }
    }
}

impl fmt::Display for PoolBuffer {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(
            f,
            "{{ pool: {}, q: {}, glitches: {}, resyncs: {}, lost: {} }}",
            self.pool_size, self.qlen, inner.glitch_count, inner.resync_count, inner.loss_count
        )
    }
}
