//! `xfade_ctl` (§4.6): round-robins `pc` proxy voice networks, crossfading
//! between the previously-chosen proxy and a newly triggered one.

use crate::error::{Error, Result};
use crate::proc::{ClassMembers, ProcCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeDir {
    In,
    Out,
    Idle,
}

struct Proxy {
    gain: f32,
    dir: FadeDir,
}

/// Maintains a round-robin of `pc` proxy voice networks (`pc >= 3`). On
/// trigger, the previously-chosen proxy fades out while a new proxy fades
/// in; a preset change is queued and applied to the *next* voice.
pub struct XfadeCtl {
    proxies: Vec<Proxy>,
    current: usize,
    step: f32,
    queued_preset: Option<String>,
    applied_presets: Vec<Option<String>>,
}

impl XfadeCtl {
    pub fn new(pc: usize, frames_per_cycle: f64, dur_ms: f64, srate: f64) -> Result<Self> {
        if pc < 3 {
            return Err(Error::InvalidArgument("xfade_ctl requires pc >= 3".into()));
        }
        let step = (frames_per_cycle / (dur_ms * srate / 1000.0)) as f32;
        Ok(XfadeCtl {
            proxies: (0..pc).map(|i| Proxy { gain: if i == 0 { 1.0 } else { 0.0 }, dir: FadeDir::Idle }).collect(),
            current: 0,
            step,
            queued_preset: None,
            applied_presets: vec![None; pc],
        })
    }

    pub fn gain(&self, proxy: usize) -> f32 {
        self.proxies[proxy].gain
    }

    pub fn preset_of(&self, proxy: usize) -> Option<&str> {
        self.applied_presets[proxy].as_deref()
    }

    /// Queues a preset change, applied to the proxy chosen by the next
    /// `trigger()` call.
    pub fn queue_preset(&mut self, name: impl Into<String>) {
        self.queued_preset = Some(name.into());
    }

    /// Triggers a crossfade to the next proxy in round-robin order.
    pub fn trigger(&mut self) {
        let next = (self.current + 1) % self.proxies.len();
        self.proxies[self.current].dir = FadeDir::Out;
        self.proxies[next].dir = FadeDir::In;
        if let Some(preset) = self.queued_preset.take() {
            self.applied_presets[next] = Some(preset);
        }
        self.current = next;
    }

    /// Advances every fading proxy by one cycle's worth of gain.
    pub fn advance(&mut self) {
        for p in &mut self.proxies {
            match p.dir {
                FadeDir::In => {
                    p.gain = (p.gain + self.step).min(1.0);
                    if p.gain >= 1.0 {
                        p.dir = FadeDir::Idle;
                    }
                }
                FadeDir::Out => {
                    p.gain = (p.gain - self.step).max(0.0);
                    if p.gain <= 0.0 {
                        p.dir = FadeDir::Idle;
                    }
                }
                FadeDir::Idle => {}
            }
        }
    }
}

impl ClassMembers for XfadeCtl {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.advance();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_at_least_three_proxies() {
        assert!(XfadeCtl::new(2, 512.0, 50.0, 48_000.0).is_err());
    }

    #[test]
    fn trigger_crossfades_in_opposite_directions() {
        let mut x = XfadeCtl::new(3, 512.0, 50.0, 48_000.0).unwrap();
        x.trigger();
        x.advance();
        assert!(x.gain(0) < 1.0);
        assert!(x.gain(1) > 0.0);
    }
}
