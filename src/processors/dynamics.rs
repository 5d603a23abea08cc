//! `compressor`/`limiter`/`dc_filter`/`audio_meter` (§4.6): per-channel DSP
//! objects whose live parameters are updated from `notify` and that report
//! to the UI on a configurable period.

use crate::buffer::AudioBuf;
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};
use crate::variable::{Channel, VarDescr};

fn db_to_lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(1e-9).log10()
}

/// A per-channel dB-domain compressor: exponential attack/release envelope
/// smoothing, threshold/ratio/makeup-gain parameters.
pub struct Compressor {
    pub input: AudioBuf,
    pub output: AudioBuf,
    pub threshold_db: f32,
    pub ratio: f32,
    pub makeup_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: Vec<f32>,
}

impl Compressor {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, attack_ms: f32, release_ms: f32) -> Self {
        let attack_coeff = (-1.0 / (attack_ms * 0.001 * srate as f32)).exp();
        let release_coeff = (-1.0 / (release_ms * 0.001 * srate as f32)).exp();
        Compressor {
            input: AudioBuf::new(ch_n, frame_n, srate),
            output: AudioBuf::new(ch_n, frame_n, srate),
            threshold_db: -18.0,
            ratio: 4.0,
            makeup_db: 0.0,
            attack_coeff,
            release_coeff,
            envelope_db: vec![-120.0; ch_n],
        }
    }
}

impl ClassMembers for Compressor {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("threshold_db", 0, 0, 1, VarDescr::default());
        ctx.vars.register("ratio", 0, 1, 1, VarDescr::default());
        ctx.vars.register("makeup_db", 0, 2, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        match vid {
            0 => if let Some(v) = ctx.vars.get("threshold_db", 0, 0).and_then(|v| v.get(Channel::Any)) {
                self.threshold_db = v.to_f64()? as f32;
            },
            1 => if let Some(v) = ctx.vars.get("ratio", 0, 1).and_then(|v| v.get(Channel::Any)) {
                self.ratio = v.to_f64()? as f32;
            },
            2 => if let Some(v) = ctx.vars.get("makeup_db", 0, 2).and_then(|v| v.get(Channel::Any)) {
                self.makeup_db = v.to_f64()? as f32;
            },
            _ => {}
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let makeup = db_to_lin(self.makeup_db);
        for c in 0..self.input.ch_n.min(self.output.ch_n) {
            let src = self.input.channel(c).to_vec();
            let mut env_db = self.envelope_db[c];
            let dst = self.output.channel_mut(c);
            for (d, s) in dst.iter_mut().zip(&src) {
                let in_db = lin_to_db(s.abs());
                let coeff = if in_db > env_db { self.attack_coeff } else { self.release_coeff };
                env_db = coeff * env_db + (1.0 - coeff) * in_db;
                let over = (env_db - self.threshold_db).max(0.0);
                let gain_reduction_db = over - over / self.ratio;
                let gain = db_to_lin(-gain_reduction_db) * makeup;
                *d = s * gain;
            }
            self.envelope_db[c] = env_db;
        }
        Ok(())
    }
}

/// A brick-wall limiter: a `Compressor` with a very high ratio and fast
/// attack, expressed as its own processor per §4.6's class list.
pub struct Limiter {
    inner: Compressor,
}

impl Limiter {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, ceiling_db: f32) -> Self {
        let mut inner = Compressor::new(ch_n, frame_n, srate, 0.1, 50.0);
        inner.threshold_db = ceiling_db;
        inner.ratio = 1000.0;
        Limiter { inner }
    }

    pub fn input_mut(&mut self) -> &mut AudioBuf {
        &mut self.inner.input
    }

    pub fn output(&self) -> &AudioBuf {
        &self.inner.output
    }
}

impl ClassMembers for Limiter {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        self.inner.create(ctx)
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, channel: Channel) -> Result<()> {
        self.inner.notify(ctx, vid, channel)
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        self.inner.exec(ctx)
    }
}

/// A one-pole DC-blocking highpass per channel.
pub struct DcFilter {
    pub input: AudioBuf,
    pub output: AudioBuf,
    coeff: f32,
    prev_in: Vec<f32>,
    prev_out: Vec<f32>,
}

impl DcFilter {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, cutoff_hz: f32) -> Self {
        let coeff = (-std::f32::consts::TAU * cutoff_hz / srate as f32).exp();
        DcFilter {
            input: AudioBuf::new(ch_n, frame_n, srate),
            output: AudioBuf::new(ch_n, frame_n, srate),
            coeff,
            prev_in: vec![0.0; ch_n],
            prev_out: vec![0.0; ch_n],
        }
    }
}

impl ClassMembers for DcFilter {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for c in 0..self.input.ch_n.min(self.output.ch_n) {
            let src = self.input.channel(c).to_vec();
            let mut x1 = self.prev_in[c];
            let mut y1 = self.prev_out[c];
            let dst = self.output.channel_mut(c);
            for (d, &x) in dst.iter_mut().zip(&src) {
                let y = x - x1 + self.coeff * y1;
                *d = y;
                x1 = x;
                y1 = y;
            }
            self.prev_in[c] = x1;
            self.prev_out[c] = y1;
        }
        Ok(())
    }
}

/// Periodically emits RMS dB and peak/clip flags for UI reporting.
pub struct AudioMeter {
    pub input: AudioBuf,
    window_sum_sq: Vec<f32>,
    window_n: usize,
    peak: Vec<f32>,
    clip_threshold: f32,
    clipped: Vec<bool>,
    report_period_cycles: u32,
    cycles_since_report: u32,
}

impl AudioMeter {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, window_n: usize, report_period_cycles: u32) -> Self {
        AudioMeter {
            input: AudioBuf::new(ch_n, frame_n, srate),
            window_sum_sq: vec![0.0; ch_n],
            window_n,
            peak: vec![0.0; ch_n],
            clip_threshold: 1.0,
            clipped: vec![false; ch_n],
            report_period_cycles,
            cycles_since_report: 0,
        }
    }

    pub fn rms_db(&self, c: usize) -> f32 {
        lin_to_db((self.window_sum_sq[c] / self.window_n.max(1) as f32).sqrt())
    }

    pub fn peak(&self, c: usize) -> f32 {
        self.peak[c]
    }

    pub fn is_clipped(&self, c: usize) -> bool {
        self.clipped[c]
    }
}

impl ClassMembers for AudioMeter {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for c in 0..self.input.ch_n {
            let mut sum_sq = 0.0;
            let mut peak = 0.0f32;
            let mut clipped = false;
            for &s in self.input.channel(c) {
                sum_sq += s * s;
                peak = peak.max(s.abs());
                if s.abs() >= self.clip_threshold {
                    clipped = true;
                }
            }
            self.window_sum_sq[c] = sum_sq;
            self.peak[c] = peak;
            self.clipped[c] = clipped;
        }
        self.cycles_since_report += 1;
        if self.cycles_since_report >= self.report_period_cycles {
            self.cycles_since_report = 0;
            for c in 0..self.input.ch_n {
                tracing::debug!(channel = c, rms_db = self.rms_db(c), peak = self.peak(c), clipped = self.clipped[c], "audio_meter report");
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
    fn compressor_reduces_gain_above_threshold() {
        let mut vars = VariableRegistry::new();
        let mut comp = Compressor::new(1, 64, 48_000.0, 1.0, 50.0);
        comp.create(&mut dummy_ctx(&mut vars)).unwrap();
        comp.threshold_db = -60.0;
        comp.ratio = 4.0;
        comp.input.channel_mut(0).fill(0.9);
        for _ in 0..20 {
            comp.exec(&mut dummy_ctx(&mut vars)).unwrap();
        }
        let out = comp.output.channel(0)[63];
        assert!(out.abs() < 0.9);
    }

    #[test]
    fn meter_detects_clipping() {
        let mut vars = VariableRegistry::new();
        let mut meter = AudioMeter::new(1, 8, 48_000.0, 8, 1);
        meter.input.channel_mut(0).fill(1.0);
        meter.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert!(meter.is_clipped(0));
    }
}
