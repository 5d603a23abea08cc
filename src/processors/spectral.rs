//! `pv_analysis`/`pv_synthesis`/`spec_dist` (§4.6).

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex, ComplexToReal};

use crate::buffer::{AudioBuf, SpectralBuf};
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};
use crate::variable::{Channel, VarDescr};

/// Wraps an STFT analysis step. Magnitudes are rescaled by `bin_n/2`;
/// `enable` zeros the output and clears ready-flags. The window length can
/// be changed via notify.
pub struct PvAnalysis {
    pub input: AudioBuf,
    pub output: SpectralBuf,
    window_n: usize,
    hop_n: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    enabled: bool,
}

impl PvAnalysis {
    pub fn new(ch_n: usize, window_n: usize, hop_n: usize, srate: f64) -> Self {
        let _ = srate;
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(window_n);
        let bin_n = window_n / 2 + 1;
        let window = hann_window(window_n);
        PvAnalysis {
            input: AudioBuf::new(ch_n, window_n, srate),
            output: SpectralBuf::new(ch_n, bin_n, hop_n, true),
            window_n,
            hop_n,
            r2c,
            window,
            enabled: true,
        }
    }

    pub fn set_window_n(&mut self, window_n: usize) {
        let mut planner = RealFftPlanner::<f32>::new();
        self.r2c = planner.plan_fft_forward(window_n);
        self.window_n = window_n;
        self.window = hann_window(window_n);
        let ch_n = self.output.ch_n;
        self.output = SpectralBuf::new(ch_n, window_n / 2 + 1, self.hop_n, true);
    }

    pub fn enable(&mut self, on: bool) {
        self.enabled = on;
        if !on {
            self.output.clear();
        }
    }
}

impl ClassMembers for PvAnalysis {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("window_n", 0, 0, 1, VarDescr::default());
        ctx.vars.register("enable", 0, 1, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        match vid {
            0 => {
                if let Some(var) = ctx.vars.get("window_n", 0, 0) {
                    if let Some(v) = var.get(Channel::Any) {
                        self.set_window_n(v.to_i64()? as usize);
                    }
                }
            }
            1 => {
                if let Some(var) = ctx.vars.get("enable", 0, 1) {
                    if let Some(v) = var.get(Channel::Any) {
                        self.enable(v.to_bool()?);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let bin_n = self.window_n / 2 + 1;
        for c in 0..self.input.ch_n.min(self.output.ch_n) {
            let mut windowed: Vec<f32> = self
                .input
                .channel(c)
                .iter()
                .zip(&self.window)
                .map(|(s, w)| s * w)
                .collect();
            windowed.resize(self.window_n, 0.0);
            let mut spectrum = self.r2c.make_output_vec();
            let _ = self.r2c.process(&mut windowed, &mut spectrum);
            // §4.6: analysis magnitudes are rescaled by bin_n/2.
            let scale = 1.0 / (bin_n as f32 / 2.0).max(1.0);
            for (i, bin) in spectrum.iter().enumerate().take(bin_n) {
                self.output.magnitude_mut(c)[i] = bin.norm() * scale;
                self.output.phase_mut(c)[i] = bin.arg();
            }
            self.output.set_ready(c, true);
        }
        Ok(())
    }
}

/// Wraps an STFT resynthesis step driven by a [`SpectralBuf`]'s ready-flags.
pub struct PvSynthesis {
    pub input: SpectralBuf,
    pub output: AudioBuf,
    window_n: usize,
    c2r: Arc<dyn ComplexToReal<f32>>,
}

impl PvSynthesis {
    pub fn new(ch_n: usize, window_n: usize, hop_n: usize, srate: f64) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let c2r = planner.plan_fft_inverse(window_n);
        let _ = hop_n;
        PvSynthesis {
            input: SpectralBuf::new(ch_n, window_n / 2 + 1, hop_n, true),
            output: AudioBuf::new(ch_n, window_n, srate),
            window_n,
            c2r,
        }
    }
}

impl ClassMembers for PvSynthesis {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for c in 0..self.input.ch_n.min(self.output.ch_n) {
            if !self.input.is_ready(c) {
                continue;
            }
            let mag = self.input.magnitude(c);
            let phase = self.input.phase(c);
            let mut spectrum: Vec<Complex32> = mag
                .iter()
                .zip(phase)
                .map(|(&m, &p)| Complex32::from_polar(m, p))
                .collect();
            let mut time = self.c2r.make_output_vec();
            let _ = self.c2r.process(&mut spectrum, &mut time);
            let n = time.len().min(self.window_n);
            self.output.channel_mut(c)[..n].copy_from_slice(&time[..n]);
        }
        Ok(())
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (std::f32::consts::TAU * i as f32 / n as f32).cos())
        .collect()
}

/// Per-channel, per-band spectral distortion with threshold/ratio/ceiling/
/// expo/bypass/mix; propagates ready-flags from input.
pub struct SpecDist {
    pub input: SpectralBuf,
    pub output: SpectralBuf,
    pub threshold: f32,
    pub ratio: f32,
    pub ceiling: f32,
    pub expo: f32,
    pub bypass: bool,
    pub mix: f32,
}

impl ClassMembers for SpecDist {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for c in 0..self.input.ch_n.min(self.output.ch_n) {
            let ready = self.input.is_ready(c);
            self.output.set_ready(c, ready);
            if !ready {
                continue;
            }
            let src_mag: Vec<f32> = self.input.magnitude(c).to_vec();
            let src_phase: Vec<f32> = self.input.phase(c).to_vec();
            let dst_mag = self.output.magnitude_mut(c);
            for (i, &m) in src_mag.iter().enumerate() {
                let distorted = if self.bypass {
                    m
                } else if m > self.threshold {
                    let over = m - self.threshold;
                    (self.threshold + over / self.ratio).min(self.ceiling).powf(self.expo)
                } else {
                    m
                };
                dst_mag[i] = m * (1.0 - self.mix) + distorted * self.mix;
            }
            self.output.phase_mut(c).copy_from_slice(&src_phase);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_marks_every_channel_ready() {
        let mut pv = PvAnalysis::new(1, 64, 16, 48_000.0);
        pv.input.channel_mut(0).fill(1.0);
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        pv.create(&mut ctx).unwrap();
        pv.exec(&mut ctx).unwrap();
        assert!(pv.output.is_ready(0));
    }

    #[test]
    fn enable_false_clears_ready_flags() {
        let mut pv = PvAnalysis::new(1, 64, 16, 48_000.0);
        pv.output.set_ready(0, true);
        pv.enable(false);
        assert!(!pv.output.is_ready(0));
    }
}
