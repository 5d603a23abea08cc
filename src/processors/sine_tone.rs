//! `sine_tone`: multi-channel sinusoid, phase integrating across cycles
//! (§4.6).

use std::f64::consts::TAU;

use crate::buffer::AudioBuf;
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};
use crate::variable::{Channel, VarDescr};

fn set_channel(v: &mut [f64], channel: Channel, value: f64) {
    match channel {
        Channel::Any => v.iter_mut().for_each(|x| *x = value),
        Channel::Index(i) => {
            if let Some(slot) = v.get_mut(i as usize) {
                *slot = value;
            }
        }
    }
}

fn set_channel_f32(v: &mut [f32], channel: Channel, value: f32) {
    match channel {
        Channel::Any => v.iter_mut().for_each(|x| *x = value),
        Channel::Index(i) => {
            if let Some(slot) = v.get_mut(i as usize) {
                *slot = value;
            }
        }
    }
}

pub struct SineTone {
    pub output: AudioBuf,
    freq_hz: Vec<f64>,
    phase: Vec<f64>,
    dc: Vec<f32>,
    gain: Vec<f32>,
}

impl SineTone {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64) -> Self {
        SineTone {
            output: AudioBuf::new(ch_n, frame_n, srate),
            freq_hz: vec![440.0; ch_n],
            phase: vec![0.0; ch_n],
            dc: vec![0.0; ch_n],
            gain: vec![1.0; ch_n],
        }
    }
}

impl ClassMembers for SineTone {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        let ch_n = self.freq_hz.len() as u32;
        ctx.vars.register("freq_hz", 0, 0, ch_n, VarDescr::default());
        ctx.vars.register("gain", 0, 1, ch_n, VarDescr::default());
        ctx.vars.register("dc", 0, 2, ch_n, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, channel: Channel) -> Result<()> {
        let label = match vid {
            0 => "freq_hz",
            1 => "gain",
            2 => "dc",
            _ => return Ok(()),
        };
        if let Some(var) = ctx.vars.get(label, 0, vid) {
            if let Some(v) = var.get(channel) {
                let f = v.to_f64()?;
                match vid {
                    0 => set_channel(&mut self.freq_hz, channel, f),
                    1 => set_channel_f32(&mut self.gain, channel, f as f32),
                    2 => set_channel_f32(&mut self.dc, channel, f as f32),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let srate = self.output.srate;
        let frame_n = self.output.frame_n;
        for c in 0..self.output.ch_n {
            let step = TAU * self.freq_hz[c] / srate;
            let mut ph = self.phase[c];
            let g = self.gain[c];
            let dc = self.dc[c];
            let out = self.output.channel_mut(c);
            for s in out.iter_mut().take(frame_n) {
                *s = g * ph.sin() as f32 + dc;
                ph += step;
            }
            self.phase[c] = ph % TAU;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::ProcId;
    use crate::variable::VariableRegistry;

    #[test]
    fn phase_integrates_across_cycles() {
        let mut vars = VariableRegistry::new();
        let mut tone = SineTone::new(1, 8, 48_000.0);
        let mut ctx = ProcCtx { id: ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        tone.create(&mut ctx).unwrap();
        tone.exec(&mut ctx).unwrap();
        let phase_after_one = tone.phase[0];
        assert!(phase_after_one > 0.0);
        tone.exec(&mut ctx).unwrap();
        assert_ne!(tone.phase[0], phase_after_one);
    }
}
