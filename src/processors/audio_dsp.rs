//! Per-channel gain, mix, split, duplicate, merge, and delay (§4.6).
//!
//! Audio buffers are wired directly between processors as struct fields
//! (set by the embedder/network glue before each `exec`); the `Variable`
//! registry carries only the scalar control parameters (gain, delay
//! length, …), keeping per-block buffer plumbing separate from node
//! parameters.

use crate::buffer::AudioBuf;
use crate::error::{Error, Result};
use crate::proc::{ClassMembers, ProcCtx};
use crate::variable::{Channel, VarDescr};

/// `audio_gain`: per-channel gain; zeroes the output first, then sets
/// `out[c] = gain[c] * in[c]`, truncating to `min(in.ch_n, out.ch_n)`.
pub struct AudioGain {
    pub input: AudioBuf,
    pub output: AudioBuf,
    gain: Vec<f32>,
}

impl AudioGain {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64) -> Self {
        AudioGain {
            input: AudioBuf::new(ch_n, frame_n, srate),
            output: AudioBuf::new(ch_n, frame_n, srate),
            gain: vec![1.0; ch_n],
        }
    }
}

impl ClassMembers for AudioGain {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("gain", 0, 0, self.gain.len() as u32, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, channel: Channel) -> Result<()> {
        if vid == 0 {
            if let Some(var) = ctx.vars.get("gain", 0, 0) {
                if let Some(v) = var.get(channel) {
                    let g = v.to_f64()? as f32;
                    match channel {
                        Channel::Any => self.gain.iter_mut().for_each(|x| *x = g),
                        Channel::Index(i) => {
                            if let Some(slot) = self.gain.get_mut(i as usize) {
                                *slot = g;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.output.zero();
        let ch_n = self.input.ch_n.min(self.output.ch_n);
        for c in 0..ch_n {
            let g = self.gain[c];
            let src = self.input.channel(c).to_vec();
            let dst = self.output.channel_mut(c);
            for (d, s) in dst.iter_mut().zip(src) {
                *d = g * s;
            }
        }
        Ok(())
    }
}

/// `audio_mix`: linear mix with per-input and per-output gain vectors.
pub struct AudioMix {
    pub inputs: Vec<AudioBuf>,
    pub output: AudioBuf,
    pub input_gain: Vec<f32>,
    pub output_gain: Vec<f32>,
}

impl AudioMix {
    pub fn new(input_n: usize, ch_n: usize, frame_n: usize, srate: f64) -> Self {
        AudioMix {
            inputs: (0..input_n).map(|_| AudioBuf::new(ch_n, frame_n, srate)).collect(),
            output: AudioBuf::new(ch_n, frame_n, srate),
            input_gain: vec![1.0; input_n],
            output_gain: vec![1.0; ch_n],
        }
    }
}

impl ClassMembers for AudioMix {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.output.zero();
        let out_ch_n = self.output.ch_n;
        for (input, &ig) in self.inputs.iter().zip(self.input_gain.iter()) {
            let ch_n = input.ch_n.min(out_ch_n);
            for c in 0..ch_n {
                let og = self.output_gain[c];
                let src = input.channel(c).to_vec();
                let dst = self.output.channel_mut(c);
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += ig * og * s;
                }
            }
        }
        Ok(())
    }
}

/// `audio_split`: channel demultiplex driven by an integer selection list —
/// `sel[i]` names which input channel output `i` copies.
pub struct AudioSplit {
    pub input: AudioBuf,
    pub outputs: Vec<AudioBuf>,
    pub sel: Vec<usize>,
}

impl ClassMembers for AudioSplit {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for (out, &src_ch) in self.outputs.iter_mut().zip(self.sel.iter()) {
            out.zero();
            if src_ch < self.input.ch_n {
                let src = self.input.channel(src_ch).to_vec();
                let ch_n = out.ch_n.min(1);
                for c in 0..ch_n {
                    let dst = out.channel_mut(c);
                    for (d, s) in dst.iter_mut().zip(&src) {
                        *d = *s;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `audio_duplicate`: replicates each input channel `dup_cnt` times.
pub struct AudioDuplicate {
    pub input: AudioBuf,
    pub output: AudioBuf,
    pub dup_cnt: usize,
}

impl ClassMembers for AudioDuplicate {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.output.zero();
        let mut out_c = 0;
        for c in 0..self.input.ch_n {
            let src = self.input.channel(c).to_vec();
            for _ in 0..self.dup_cnt {
                if out_c >= self.output.ch_n {
                    break;
                }
                let dst = self.output.channel_mut(out_c);
                for (d, s) in dst.iter_mut().zip(&src) {
                    *d = *s;
                }
                out_c += 1;
            }
        }
        Ok(())
    }
}

/// `audio_merge`: concatenates channels from every input into the output.
pub struct AudioMerge {
    pub inputs: Vec<AudioBuf>,
    pub output: AudioBuf,
}

impl ClassMembers for AudioMerge {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.output.zero();
        let mut out_c = 0;
        for input in &self.inputs {
            for c in 0..input.ch_n {
                if out_c >= self.output.ch_n {
                    return Ok(());
                }
                let src = input.channel(c).to_vec();
                let dst = self.output.channel_mut(out_c);
                for (d, s) in dst.iter_mut().zip(&src) {
                    *d = *s;
                }
                out_c += 1;
            }
        }
        Ok(())
    }
}

/// `audio_delay`: per-channel ring delay clamped to a declared maximum. The
/// ring is rezeroed whenever the delay length changes.
pub struct AudioDelay {
    pub input: AudioBuf,
    pub output: AudioBuf,
    max_delay_n: usize,
    delay_n: usize,
    rings: Vec<Vec<f32>>,
    write_idx: Vec<usize>,
}

impl AudioDelay {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, max_delay_n: usize) -> Self {
        AudioDelay {
            input: AudioBuf::new(ch_n, frame_n, srate),
            output: AudioBuf::new(ch_n, frame_n, srate),
            max_delay_n,
            delay_n: 0,
            rings: vec![vec![0.0; max_delay_n.max(1)]; ch_n],
            write_idx: vec![0; ch_n],
        }
    }

    pub fn set_delay_n(&mut self, delay_n: usize) -> Result<()> {
        if delay_n > self.max_delay_n {
            return Err(Error::InvalidArgument(format!(
                "delay {delay_n} exceeds max {}",
                self.max_delay_n
            )));
        }
        if delay_n != self.delay_n {
            self.delay_n = delay_n;
            for ring in &mut self.rings {
                ring.iter_mut().for_each(|s| *s = 0.0);
            }
            self.write_idx.iter_mut().for_each(|w| *w = 0);
        }
        Ok(())
    }
}

impl ClassMembers for AudioDelay {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("delay_n", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            if let Some(var) = ctx.vars.get("delay_n", 0, 0) {
                if let Some(v) = var.get(Channel::Any) {
                    self.set_delay_n(v.to_i64()? as usize)?;
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.output.zero();
        let ch_n = self.input.ch_n.min(self.output.ch_n);
        let cap = self.rings[0].len();
        for c in 0..ch_n {
            let src = self.input.channel(c).to_vec();
            for (i, s) in src.iter().enumerate() {
                let w = self.write_idx[c];
                self.rings[c][w] = *s;
                let read_idx = (w + cap - self.delay_n) % cap;
                self.output.channel_mut(c)[i] = self.rings[c][read_idx];
                self.write_idx[c] = (w + 1) % cap;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::ProcId;
    use crate::variable::VariableRegistry;

    fn dummy_ctx(vars: &mut VariableRegistry) -> ProcCtx {
        ProcCtx { id: ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars }
    }

    #[test]
    fn gain_on_silence_is_silent() {
        let mut vars = VariableRegistry::new();
        let mut g = AudioGain::new(1, 4, 48_000.0);
        g.create(&mut dummy_ctx(&mut vars)).unwrap();
        g.gain[0] = 3.0;
        g.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert_eq!(g.output.channel(0), [0.0; 4]);
    }

    #[test]
    fn gain_scales_constant_input() {
        let mut vars = VariableRegistry::new();
        let mut g = AudioGain::new(1, 4, 48_000.0);
        g.create(&mut dummy_ctx(&mut vars)).unwrap();
        g.input.channel_mut(0).fill(2.0);
        g.gain[0] = 0.5;
        g.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert_eq!(g.output.channel(0), [1.0; 4]);
    }

    #[test]
    fn mix_sums_two_gained_inputs() {
        let mut vars = VariableRegistry::new();
        let mut mix = AudioMix::new(2, 1, 4, 48_000.0);
        mix.create(&mut dummy_ctx(&mut vars)).unwrap();
        mix.inputs[0].channel_mut(0).fill(1.0);
        mix.inputs[1].channel_mut(0).fill(2.0);
        mix.input_gain = vec![0.5, 0.25];
        mix.output_gain = vec![2.0];
        mix.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert_eq!(mix.output.channel(0), [2.0; 4]);
    }

    #[test]
    fn delay_outputs_input_delayed_by_exactly_d_samples() {
        let mut vars = VariableRegistry::new();
        let mut d = AudioDelay::new(1, 8, 48_000.0, 16);
        d.create(&mut dummy_ctx(&mut vars)).unwrap();
        d.set_delay_n(3).unwrap();
        let input: Vec<f32> = (1..=8).map(|x| x as f32).collect();
        d.input.channel_mut(0).copy_from_slice(&input);
        d.exec(&mut dummy_ctx(&mut vars)).unwrap();
        // After rewarming (samples 0..3 are still draining the zeroed
        // ring), output[3..] == input[0..5].
        assert_eq!(&d.output.channel(0)[3..8], &input[0..5]);
    }

    #[test]
    fn delay_length_change_rezeroes_ring() {
        let mut vars = VariableRegistry::new();
        let mut d = AudioDelay::new(1, 4, 48_000.0, 16);
        d.create(&mut dummy_ctx(&mut vars)).unwrap();
        d.set_delay_n(2).unwrap();
        d.input.channel_mut(0).fill(9.0);
        d.exec(&mut dummy_ctx(&mut vars)).unwrap();
        d.set_delay_n(5).unwrap();
        assert!(d.rings[0].iter().all(|&x| x == 0.0));
    }
}
