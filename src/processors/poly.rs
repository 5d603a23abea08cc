//! `poly` (§4.6, §4.7): hosts a polyphonic internal network of `count`
//! independent voice networks, executed serially or across a thread pool of
//! `thread_cnt` workers with optional CPU affinities.

use std::time::Duration;

use crate::error::Result;
use crate::network::{run_poly_voices, Network, VoicePool};
use crate::proc::{ClassMembers, ProcCtx};

/// Identifies which backing pool (if any) parallelizes voice execution.
pub enum PoolKind {
    Serial,
    Futex,
    Condvar,
}

/// A proc whose `exec` drives `count` voice [`Network`]s in lock-step, one
/// call to [`run_poly_voices`] per cycle.
pub struct Poly {
    voices: Vec<Network>,
    pool: Option<VoicePool>,
    timeout: Duration,
}

impl Poly {
    /// Builds `count` voice networks via `build_voice`, optionally backed by
    /// a `thread_cnt`-worker pool of `kind`.
    pub fn new<F>(count: usize, kind: PoolKind, thread_cnt: usize, mut build_voice: F, timeout: Duration) -> Self
    where
        F: FnMut(usize) -> Network,
    {
        let voices: Vec<Network> = (0..count).map(&mut build_voice).collect();
        let pool = match kind {
            PoolKind::Serial => None,
            PoolKind::Futex => Some(VoicePool::new_futex(thread_cnt)),
            PoolKind::Condvar => Some(VoicePool::new_condvar(thread_cnt)),
        };
        Poly { voices, pool, timeout }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, i: usize) -> &Network {
        &self.voices[i]
    }

    pub fn voice_mut(&mut self, i: usize) -> &mut Network {
        &mut self.voices[i]
    }

    /// Applies a named preset to one voice by index (§4.6 `preset_sfx_id`).
    pub fn apply_preset_to_voice(&mut self, voice_idx: usize, preset_name: &str) -> Result<()> {
        self.voices[voice_idx].apply_preset(preset_name)
    }
}

impl ClassMembers for Poly {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        run_poly_voices(&mut self.voices, self.pool.as_ref(), self.timeout)
    }

    fn destroy(&mut self, _ctx: &mut ProcCtx) {
        for v in &mut self.voices {
            v.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::proc::{Proc, ProcId};

    struct OneShot;
    impl ClassMembers for OneShot {
        fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
            Ok(())
        }
        fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
            Err(Error::EndOfFile)
        }
    }

    fn build(i: usize) -> Network {
        let mut net = Network::new();
        let id = net.alloc_proc_id();
        net.add_proc(Proc::new(id, "voice", i as u32, Box::new(OneShot))).unwrap();
        net
    }

    #[test]
    fn serial_poly_runs_every_voice_one_cycle() {
        let mut poly = Poly::new(4, PoolKind::Serial, 0, build, Duration::from_secs(1));
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: ProcId(0), label: "poly", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        poly.exec(&mut ctx).unwrap();
        for i in 0..4 {
            assert_eq!(poly.voice(i).cycle_idx(), 1);
        }
    }
}
