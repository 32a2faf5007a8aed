//! per channel packet loss concealment.
//!
//! Keeps a short history of played packets, fits a Burg autoregressive model
//! over it when a packet goes missing, and rolls the model forward to
//! synthesize the gap.  The first real packet after a gap is cross-faded
//! against the predicted trajectory so the seam doesn't click, and while a
//! gap persists the synthesized audio is fed back into the history so the
//! model stays consistent with what was actually played.
use crate::dsp::burg::BurgAlgorithm;

// history target is about 192 samples regardless of block size
const HIST_TARGET_SAMPS: f64 = 192.0;
const MIN_HIST: usize = 2;
const MAX_HIST: usize = 6; // keep a lid on CPU load

/// pick the history depth in packets for a block size
pub fn history_packets(frames: usize) -> usize {
    let h = (HIST_TARGET_SAMPS / frames as f64).round() as usize;
    h.clamp(MIN_HIST, MAX_HIST)
}

/// concealment state for one channel of one direction
pub struct ChannelPlc {
    frames: usize,
    hist: usize,
    last_packets: Vec<Vec<f32>>, // [0] is the newest
    train: Vec<f32>,
    coeffs: Vec<f64>,
    tail: Vec<f32>,
    prediction: Vec<f32>,
    next_pred: Vec<f32>,
    fade_up: Vec<f32>,
    fade_down: Vec<f32>,
    last_was_glitch: bool,
    packet_cnt: u64,
    burg: BurgAlgorithm,
}

impl ChannelPlc {
    pub fn new(frames: usize) -> ChannelPlc {
        let hist = history_packets(frames);
        let train_samps = hist * frames;
        let mut fade_up = vec![0.0; frames];
        let mut fade_down = vec![0.0; frames];
        for i in 0..frames {
            fade_up[i] = i as f32 / frames as f32;
            fade_down[i] = 1.0 - fade_up[i];
        }
        ChannelPlc {
            frames,
            hist,
            last_packets: vec![vec![0.0; frames]; hist],
            train: vec![0.0; train_samps],
            coeffs: vec![0.0; train_samps - 2],
            tail: Vec::with_capacity(3 * train_samps),
            prediction: vec![0.0; 2 * train_samps],
            next_pred: vec![0.0; frames],
            fade_up,
            fade_down,
            last_was_glitch: false,
            packet_cnt: 0,
            burg: BurgAlgorithm::new(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.hist
    }
    pub fn last_was_glitch(&self) -> bool {
        self.last_was_glitch
    }
    /// the seam buffer: what the model expected the next packet to be
    pub fn next_pred(&self) -> &[f32] {
        &self.next_pred
    }

    /// a real packet arrived.  out gets the audio to play: usually truth
    /// itself, or a cross-fade out of the predicted trajectory when we were
    /// just concealing.
    pub fn accept(&mut self, truth: &[f32], out: &mut [f32]) -> () {
        if self.last_was_glitch {
            for i in 0..self.frames {
                out[i] = truth[i] * self.fade_up[i] + self.next_pred[i] * self.fade_down[i];
            }
        } else {
            out.copy_from_slice(&truth[..self.frames]);
        }
        self.push_history(truth);
        self.last_was_glitch = false;
        self.packet_cnt += 1;
    }

    /// the packet is missing.  out gets a synthesized block.
    pub fn conceal(&mut self, out: &mut [f32]) -> () {
        if self.packet_cnt == 0 {
            // nothing has ever played on this channel
            out.fill(0.0);
            return;
        }
        // flatten history oldest first and refit the model
        for i in 0..self.hist {
            let src = &self.last_packets[i];
            let dst = (self.hist - (i + 1)) * self.frames;
            self.train[dst..dst + self.frames].copy_from_slice(src);
        }
        self.burg.train(&mut self.coeffs, &self.train);

        self.tail.clear();
        self.tail.extend_from_slice(&self.train);
        self.burg
            .predict(&self.coeffs, &mut self.tail, 2 * self.train.len());
        self.prediction
            .copy_from_slice(&self.tail[self.train.len()..]);

        if self.last_was_glitch {
            // keep extending the trajectory we already started playing
            out.copy_from_slice(&self.next_pred);
        } else {
            out.copy_from_slice(&self.prediction[0..self.frames]);
        }
        self.next_pred
            .copy_from_slice(&self.prediction[self.frames..2 * self.frames]);

        // the model has to believe what the listener heard
        self.push_history(out);
        self.last_was_glitch = true;
        self.packet_cnt += 1;
    }

    fn push_history(&mut self, packet: &[f32]) -> () {
        let oldest = self.last_packets.len() - 1;
        let mut recycled = self.last_packets.remove(oldest);
        recycled.copy_from_slice(&packet[..self.frames]);
        self.last_packets.insert(0, recycled);
    }
}
