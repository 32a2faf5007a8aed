//! in-place DSP units and the three chains that run them.
//!
//! A plugin is appended before start, initialized exactly once with the
//! session sample rate and block size, and from then on only ever touched by
//! the real time callbacks.  The to-network chain runs over the capture
//! scratch, the from-network chain over the playback buffers, and the
//! to-monitor chain reads the monitor bank and mixes into the playback
//! buffers.
use simple_error::bail;

use crate::common::box_error::BoxError;

/// one DSP unit.  compute works in place on a set of channel buffers; mix
/// reads one set and accumulates into another (the monitor path).
pub trait Plugin {
    fn name(&self) -> &str;
    /// called exactly once before the first callback
    fn init(&mut self, sample_rate: u32, frames: usize) -> ();
    fn set_channels(&mut self, inputs: usize, outputs: usize) -> ();
    /// channel count the unit was built for
    fn channels(&self) -> usize;
    fn compute(&mut self, frames: usize, bufs: &mut [Vec<f32>]) -> ();
    /// monitor flavor: read input, accumulate into output.  The default is a
    /// straight additive mix, which is all a bare monitor path needs.
    fn mix(&mut self, frames: usize, input: &[Vec<f32>], output: &mut [Vec<f32>]) -> () {
        for (i, out) in output.iter_mut().enumerate() {
            let src = &input[i.min(input.len() - 1)];
            for j in 0..frames {
                out[j] += src[j];
            }
        }
    }
}

type BoxedPlugin = std::boxed::Box<
    dyn Plugin
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;

/// an append-only ordered list of plugins for one path
pub struct PluginChain {
    name: &'static str,
    width: usize, // channel count of the path
    plugins: Vec<BoxedPlugin>,
    inited: bool,
}

impl PluginChain {
    pub fn new(name: &'static str, width: usize) -> PluginChain {
        PluginChain {
            name,
            width,
            plugins: vec![],
            inited: false,
        }
    }
    /// add a plugin to the end of the chain.  A unit that wants more
    /// channels than the path carries is refused, and nothing can be added
    /// once the chain is running.
    pub fn append(&mut self, plugin: BoxedPlugin) -> Result<(), BoxError> {
        if self.inited {
            bail!("chain '{}' is already running", self.name);
        }
        if plugin.channels() > self.width {
            bail!(
                "plugin '{}' wants {} channels but the '{}' path carries {}",
                plugin.name(),
                plugin.channels(),
                self.name,
                self.width
            );
        }
        self.plugins.push(plugin);
        Ok(())
    }
    /// initialize every plugin exactly once
    pub fn init_all(&mut self, sample_rate: u32, frames: usize) -> () {
        if self.inited {
            return;
        }
        for p in &mut self.plugins {
            p.set_channels(self.width, self.width);
            p.init(sample_rate, frames);
        }
        self.inited = true;
    }
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
    pub fn len(&self) -> usize {
        self.plugins.len()
    }
    /// run the chain in place, in list order
    pub fn run(&mut self, frames: usize, bufs: &mut [Vec<f32>]) -> () {
        for p in &mut self.plugins {
            p.compute(frames, bufs);
        }
    }
    /// run the chain in mix mode (monitor path)
    pub fn run_mix(&mut self, frames: usize, input: &[Vec<f32>], output: &mut [Vec<f32>]) -> () {
        for p in &mut self.plugins {
            p.mix(frames, input, output);
        }
    }
    /// tear the chain down, newest first
    pub fn destroy_all(&mut self) -> () {
        while self.plugins.pop().is_some() {}
        self.inited = false;
    }
}

#[cfg(test)]
pub mod test_plugins {
    use super::*;

    /// scales every sample.  Only exists to exercise the chains.
    pub struct Gain {
        gain: f32,
        channels: usize,
        inited: bool,
    }
    impl Gain {
        pub fn new(gain: f32, channels: usize) -> Gain {
            Gain {
                gain,
                channels,
                inited: false,
            }
        }
    }
    impl Plugin for Gain {
        fn name(&self) -> &str {
            "gain"
        }
        fn init(&mut self, _sample_rate: u32, _frames: usize) -> () {
            assert!(!self.inited, "init called twice");
            self.inited = true;
        }
        fn set_channels(&mut self, inputs: usize, _outputs: usize) -> () {
            self.channels = inputs;
        }
        fn channels(&self) -> usize {
            self.channels
        }
        fn compute(&mut self, frames: usize, bufs: &mut [Vec<f32>]) -> () {
            for chan in bufs.iter_mut() {
                for v in chan[..frames].iter_mut() {
                    *v *= self.gain;
                }
            }
        }
    }

    #[test]
    fn chain_runs_in_order() {
        let mut chain = PluginChain::new("to-network", 2);
        chain.append(Box::new(Gain::new(2.0, 2))).unwrap();
        chain.append(Box::new(Gain::new(0.5, 2))).unwrap();
        chain.init_all(48000, 8);
        let mut bufs = vec![vec![0.25; 8]; 2];
        chain.run(8, &mut bufs);
        // 0.25 * 2.0 * 0.5
        assert_eq!(bufs[0][0], 0.25);
    }

    #[test]
    fn rejects_wide_plugins() {
        let mut chain = PluginChain::new("from-network", 1);
        let res = chain.append(Box::new(Gain::new(1.0, 2)));
        assert!(res.is_err());
    }

    #[test]
    fn rejects_append_after_start() {
        let mut chain = PluginChain::new("to-network", 2);
        chain.init_all(48000, 64);
        assert!(chain.append(Box::new(Gain::new(1.0, 2))).is_err());
    }

    #[test]
    fn monitor_mix_accumulates() {
        let mut chain = PluginChain::new("to-monitor", 2);
        chain.append(Box::new(Gain::new(1.0, 2))).unwrap();
        chain.init_all(48000, 4);
        let input = vec![vec![0.5; 4]; 2];
        let mut output = vec![vec![0.25; 4]; 2];
        chain.run_mix(4, &input, &mut output);
        assert_eq!(output[0][0], 0.75);
    }

    #[test]
    fn destroy_empties_the_chain() {
        let mut chain = PluginChain::new("to-network", 2);
        chain.append(Box::new(Gain::new(2.0, 2))).unwrap();
        chain.init_all(48000, 8);
        chain.destroy_all();
        assert!(chain.is_empty());
    }
}
