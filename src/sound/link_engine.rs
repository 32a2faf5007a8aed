//! the real time glue between the audio device and the network.
//!
//! Two callbacks, both real time: the input callback pushes captured audio
//! through the to-network chain and encodes it for the transmit sink, the
//! output callback pulls from the jitter buffer, decodes, runs the
//! from-network chain and mixes in the monitor path.  On duplex devices both
//! run on one thread through [`LinkEngine::process`]; split devices call
//! [`LinkEngine::split`] and drive the two halves from their own threads.
//!
//! Neither callback blocks, allocates buffers, or returns errors.  Anything
//! that can go wrong is either refused at setup or counted and survived.
use std::sync::mpsc;
use std::sync::Arc;

use log::error;
use serde_json::json;

use crate::common::audio_packet::{AudioPacket, PacketShape};
use crate::common::box_error::BoxError;
use crate::common::config::{InputMixMode, SessionConfig};
use crate::common::get_micro_time;
use crate::common::stream_stats::Throttle;

use super::audio_tester::AudioTester;
use super::monitor::MonitorBuffer;
use super::plugin::{Plugin, PluginChain};
use super::{PacketBuffer, TransmitSink};

// how often the output side pushes a status event to the web side
const STATUS_INTERVAL_US: u128 = 2_000_000;

/// capture half of the engine
pub struct InputSide {
    frames: usize,
    channels_in: usize,
    net_channels: usize,
    mono_source: bool,
    scratch: Vec<Vec<f32>>,
    xmit_packet: AudioPacket,
    to_network: PluginChain,
    monitor: Arc<MonitorBuffer>,
    monitor_active: bool,
    tester: Arc<AudioTester>,
    sink: Box<dyn TransmitSink + Send>,
    oversize_logged: bool,
}

impl InputSide {
    /// feed one block of captured audio.  ins holds the device channel
    /// buffers; with mix-to-mono the adapter has already folded the pair
    /// down and ins[0] is the mono source.
    pub fn input_callback(&mut self, ins: &[&[f32]], frames: usize) -> () {
        if frames > self.frames || ins.len() < self.channels_in {
            if !self.oversize_logged {
                error!(
                    "input callback got {} frames x {} chans, configured for {} x {}",
                    frames,
                    ins.len(),
                    self.frames,
                    self.channels_in
                );
                self.oversize_logged = true;
            }
            return;
        }

        let testing = self.tester.get_enabled();
        if !testing && self.to_network.is_empty() && !self.monitor_active {
            // fast path: straight from the device buffers to the wire
            self.xmit_packet.encode(&ins[..self.net_channels]);
            self.sink.send(self.xmit_packet.payload());
            return;
        }

        for (i, chan) in self.scratch.iter_mut().enumerate() {
            chan[..frames].copy_from_slice(&ins[i][..frames]);
        }

        self.to_network.run(frames, &mut self.scratch);

        {
            let chans: Vec<&[f32]> = self.scratch.iter().map(|c| c.as_slice()).collect();
            self.monitor.publish(&chans, frames, self.mono_source);
        }

        if testing {
            let last = self.scratch.len() - 1;
            self.tester
                .write_impulse(&mut self.scratch[last], get_micro_time());
        }

        {
            let chans: Vec<&[f32]> = self
                .scratch
                .iter()
                .take(self.net_channels)
                .map(|c| c.as_slice())
                .collect();
            self.xmit_packet.encode(&chans);
        }
        self.sink.send(self.xmit_packet.payload());
    }
}

/// playback half of the engine
pub struct OutputSide {
    frames: usize,
    channels_out: usize,
    recv_packet: AudioPacket,
    from_network: PluginChain,
    to_monitor: PluginChain,
    monitor: Arc<MonitorBuffer>,
    tester: Arc<AudioTester>,
    buffer: Arc<dyn PacketBuffer + Send + Sync>,
    status_tx: Option<mpsc::Sender<serde_json::Value>>,
    status_pacer: Throttle,
    oversize_logged: bool,
}

impl OutputSide {
    /// fill one block of playback audio
    pub fn output_callback(&mut self, outs: &mut [Vec<f32>], frames: usize) -> () {
        if frames > self.frames || outs.len() < self.channels_out {
            if !self.oversize_logged {
                error!(
                    "output callback got {} frames x {} chans, configured for {} x {}",
                    frames,
                    outs.len(),
                    self.frames,
                    self.channels_out
                );
                self.oversize_logged = true;
            }
            return;
        }
        let now = get_micro_time();

        self.buffer.pull(self.recv_packet.payload_mut());
        {
            let mut chans: Vec<&mut [f32]> = outs
                .iter_mut()
                .take(self.channels_out)
                .map(|c| c.as_mut_slice())
                .collect();
            self.recv_packet.decode(&mut chans);
        }

        if self.tester.get_enabled() {
            self.tester.look_for_pulse(&outs[self.channels_out - 1], now);
        }

        self.from_network.run(frames, outs);

        if !self.to_monitor.is_empty() {
            let to_monitor = &mut self.to_monitor;
            self.monitor.with_ready(|bank| {
                to_monitor.run_mix(frames, bank, outs);
            });
        }

        self.send_status(now);
    }

    /// give any listeners on the status channel an update
    fn send_status(&mut self, now: u128) -> () {
        if let Some(tx) = &self.status_tx {
            if self.status_pacer.fire(now) {
                let stats = self.buffer.snapshot_stats();
                let event = json!({
                    "streamEvent": {
                        "buffer": stats.as_json(),
                        "testerLatencyMs": self.tester.get_roundtrip_ms(),
                        "monitorDrops": self.monitor.get_drops(),
                    }
                });
                let _res = tx.send(event);
            }
        }
    }
}

/// the assembled endpoint.  Build it, hang plugins on it, call setup, then
/// hand it to the device glue.
pub struct LinkEngine {
    input: InputSide,
    output: OutputSide,
    started: bool,
    sample_rate: u32,
    frames: usize,
}

impl LinkEngine {
    pub fn build(
        config: &SessionConfig,
        sink: Box<dyn TransmitSink + Send>,
        buffer: Arc<dyn PacketBuffer + Send + Sync>,
        status_tx: Option<mpsc::Sender<serde_json::Value>>,
    ) -> Result<LinkEngine, BoxError> {
        config.validate()?;
        let frames = config.frames;
        let net_channels = config.net_channels_in();
        let monitor = Arc::new(MonitorBuffer::new(config.channels_out, frames));
        let tester = Arc::new(AudioTester::new());
        let mono_source =
            config.channels_in == 1 || config.mix_mode == InputMixMode::MixToMono;
        let now = get_micro_time();
        Ok(LinkEngine {
            input: InputSide {
                frames,
                channels_in: config.channels_in,
                net_channels,
                mono_source,
                scratch: vec![vec![0.0; frames]; config.channels_in],
                xmit_packet: AudioPacket::new(PacketShape {
                    frames,
                    channels: net_channels,
                    width: config.bit_depth,
                }),
                to_network: PluginChain::new("to-network", net_channels),
                monitor: monitor.clone(),
                monitor_active: false,
                tester: tester.clone(),
                sink,
                oversize_logged: false,
            },
            output: OutputSide {
                frames,
                channels_out: config.channels_out,
                recv_packet: AudioPacket::new(PacketShape {
                    frames,
                    channels: config.channels_out,
                    width: config.bit_depth,
                }),
                from_network: PluginChain::new("from-network", config.channels_out),
                to_monitor: PluginChain::new("to-monitor", config.channels_out),
                monitor,
                tester,
                buffer,
                status_tx,
                status_pacer: Throttle::new(now, STATUS_INTERVAL_US),
                oversize_logged: false,
            },
            started: false,
            sample_rate: config.sample_rate,
            frames,
        })
    }

    pub fn append_to_network(
        &mut self,
        plugin: Box<dyn Plugin + Send + Sync>,
    ) -> Result<(), BoxError> {
        self.input.to_network.append(plugin)
    }
    pub fn append_from_network(
        &mut self,
        plugin: Box<dyn Plugin + Send + Sync>,
    ) -> Result<(), BoxError> {
        self.output.from_network.append(plugin)
    }
    pub fn append_to_monitor(
        &mut self,
        plugin: Box<dyn Plugin + Send + Sync>,
    ) -> Result<(), BoxError> {
        self.output.to_monitor.append(plugin)
    }

    pub fn tester(&self) -> Arc<AudioTester> {
        self.output.tester.clone()
    }
    pub fn monitor(&self) -> Arc<MonitorBuffer> {
        self.output.monitor.clone()
    }

    /// initialize every plugin exactly once and freeze the chains.  Must run
    /// before the first callback.
    pub fn setup(&mut self) -> () {
        if self.started {
            return;
        }
        self.input.to_network.init_all(self.sample_rate, self.frames);
        self.output
            .from_network
            .init_all(self.sample_rate, self.frames);
        self.output
            .to_monitor
            .init_all(self.sample_rate, self.frames);
        self.input.monitor_active = !self.output.to_monitor.is_empty();
        self.started = true;
    }

    /// tear the plugin chains down, newest first.  The device has stopped
    /// the stream by the time anyone calls this.
    pub fn teardown(&mut self) -> () {
        self.input.to_network.destroy_all();
        self.output.from_network.destroy_all();
        self.output.to_monitor.destroy_all();
        self.started = false;
    }

    /// duplex devices: one thread runs both directions back to back
    pub fn process(&mut self, ins: &[&[f32]], outs: &mut [Vec<f32>], frames: usize) -> () {
        self.input.input_callback(ins, frames);
        self.output.output_callback(outs, frames);
    }

    /// split devices: take the two halves apart so each device thread owns
    /// its own side.  Call setup first.
    pub fn split(self) -> (InputSide, OutputSide) {
        (self.input, self.output)
    }
}

#[cfg(test)]
mod test_link_engine {
    use super::*;
    use crate::common::sample_codec::{encode_frame, BitDepth};
    use crate::sound::plugin::test_plugins::Gain;
    use crate::sound::{build_buffer, ChannelSink};

    fn test_config() -> SessionConfig {
        let mut c = SessionConfig::default();
        c.frames = 32;
        c
    }

    fn build_engine(
        config: &SessionConfig,
    ) -> (LinkEngine, mpsc::Receiver<Vec<u8>>) {
        let (sink, rx) = ChannelSink::new(16);
        let buffer = build_buffer(config).unwrap();
        let engine = LinkEngine::build(config, Box::new(sink), buffer, None).unwrap();
        (engine, rx)
    }

    #[test]
    fn fast_path_is_bit_exact_and_skips_monitor() {
        // no plugins, no tester: the packet on the wire is the plain encode
        // of the device buffers and the monitor never publishes
        let config = test_config();
        let (mut engine, rx) = build_engine(&config);
        engine.setup();
        let monitor = engine.monitor();

        let left: Vec<f32> = (0..32).map(|i| i as f32 / 100.0).collect();
        let right: Vec<f32> = (0..32).map(|i| -(i as f32) / 100.0).collect();
        let mut outs = vec![vec![0.0f32; 32]; 2];
        engine.process(&[&left, &right], &mut outs, 32);

        let sent = rx.try_recv().expect("a packet should have been sent");
        let mut expect = vec![0u8; 32 * 2 * 2];
        encode_frame(&[&left, &right], 32, BitDepth::Bit16, &mut expect);
        assert_eq!(sent, expect);
        assert_eq!(monitor.get_publishes(), 0);
    }

    #[test]
    fn plugins_run_and_monitor_publishes() {
        let config = test_config();
        let (mut engine, rx) = build_engine(&config);
        engine.append_to_network(Box::new(Gain::new(0.5, 2))).unwrap();
        engine.append_to_monitor(Box::new(Gain::new(1.0, 2))).unwrap();
        engine.setup();
        let monitor = engine.monitor();

        let left = vec![0.5f32; 32];
        let right = vec![0.5f32; 32];
        let mut outs = vec![vec![0.0f32; 32]; 2];
        engine.process(&[&left, &right], &mut outs, 32);

        // the wire packet carries the gained down audio
        let sent = rx.try_recv().unwrap();
        let halved = vec![0.25f32; 32];
        let mut expect = vec![0u8; 32 * 2 * 2];
        encode_frame(&[&halved, &halved], 32, BitDepth::Bit16, &mut expect);
        assert_eq!(sent, expect);
        assert_eq!(monitor.get_publishes(), 1);
    }

    #[test]
    fn monitor_path_mixes_into_playback() {
        let config = test_config();
        let (mut engine, _rx) = build_engine(&config);
        engine.append_to_monitor(Box::new(Gain::new(1.0, 2))).unwrap();
        engine.setup();

        let left = vec![0.25f32; 32];
        let right = vec![0.25f32; 32];
        let mut outs = vec![vec![0.0f32; 32]; 2];
        engine.process(&[&left, &right], &mut outs, 32);

        // nothing was received, so playback is the monitor mix alone
        assert!((outs[0][5] - 0.25).abs() < 1e-6);
        assert!((outs[1][5] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn loopback_through_the_jitter_buffer() {
        // wire the sink back into the buffer and audio crosses the engine
        let config = test_config();
        let (mut engine, rx) = build_engine(&config);
        engine.setup();
        let buffer = engine.output.buffer.clone();

        let left = vec![0.4f32; 32];
        let right = vec![0.2f32; 32];
        let mut outs = vec![vec![0.0f32; 32]; 2];
        for seq in 0..3u16 {
            engine.input.input_callback(&[&left, &right], 32);
            let packet = rx.try_recv().unwrap();
            buffer.push(&packet, seq);
            engine.output.output_callback(&mut outs, 32);
        }
        assert!((outs[0][10] - 0.4).abs() < 1.0 / 32000.0);
        assert!((outs[1][10] - 0.2).abs() < 1.0 / 32000.0);
    }

    #[test]
    fn oversize_callback_is_refused() {
        let config = test_config();
        let (mut engine, rx) = build_engine(&config);
        engine.setup();
        let big = vec![0.1f32; 64];
        let mut outs = vec![vec![0.0f32; 64]; 2];
        engine.process(&[&big, &big], &mut outs, 64);
        assert!(rx.try_recv().is_err()); // nothing went out
    }

    #[test]
    fn setup_teardown_is_idempotent() {
        let config = test_config();
        let (mut engine, _rx) = build_engine(&config);
        engine.append_to_network(Box::new(Gain::new(2.0, 2))).unwrap();
        engine.setup();
        engine.setup(); // second call is a no-op, init runs once
        engine.teardown();
        engine.teardown();
        assert!(engine.input.to_network.is_empty());
    }

    #[test]
    fn mix_to_mono_sends_one_channel() {
        let mut config = test_config();
        config.mix_mode = InputMixMode::MixToMono;
        let (mut engine, rx) = build_engine(&config);
        engine.setup();
        let mixed = vec![0.3f32; 32];
        let ignored = vec![0.9f32; 32];
        let mut outs = vec![vec![0.0f32; 32]; 2];
        engine.process(&[&mixed, &ignored], &mut outs, 32);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.len(), 32 * 1 * 2); // one channel on the wire
    }
}
