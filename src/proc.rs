//! Processor instances and their lifecycle contract (§3, §4.5).
//!
//! The source's per-class function-pointer method table becomes a trait
//! with five methods, per §9 "Runtime dispatch": [`ClassMembers`].

use crate::error::Result;
use crate::variable::VariableRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(pub u32);

/// Per-cycle execution context handed to a proc's lifecycle callbacks.
pub struct ProcCtx<'a> {
    pub id: ProcId,
    pub label: &'a str,
    pub sfx_id: u32,
    pub cycle_idx: u64,
    pub vars: &'a mut VariableRegistry,
}

/// The five lifecycle callbacks a processor class implements (§4.5):
///
/// - `create` runs once, single-threaded, during network build and may
///   register variables;
/// - `notify` runs every time one of the proc's variables changes value,
///   including pre-runtime updates, and during runtime only from the
///   proc's own exec thread;
/// - `exec` runs once per network cycle when the proc is scheduled and must
///   not block;
/// - `report` is a best-effort diagnostic dump;
/// - `destroy` runs once during teardown.
///
/// `exec` returning any error other than [`crate::Error::EndOfFile`] is
/// logged and the cycle continues; `EndOfFile` propagates out of the
/// network as a normal termination (§4.5, §7).
pub trait ClassMembers: Send {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()>;

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, channel: crate::variable::Channel) -> Result<()> {
        let _ = (ctx, vid, channel);
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()>;

    fn report(&mut self, ctx: &ProcCtx) {
        let _ = ctx;
    }

    fn destroy(&mut self, ctx: &mut ProcCtx) {
        let _ = ctx;
    }
}

/// A processor instance: owns its variables, a class-descriptor
/// implementing [`ClassMembers`] (which also holds the proc's user state),
/// and is identified within its network by `(label, sfx_id)`.
pub struct Proc {
    pub id: ProcId,
    pub label: String,
    pub sfx_id: u32,
    pub vars: VariableRegistry,
    pub class: Box<dyn ClassMembers>,
    /// Set once `exec` has returned `EndOfFile`; the network will not
    /// schedule this proc again.
    pub finished: bool,
}

impl Proc {
    pub fn new(id: ProcId, label: impl Into<String>, sfx_id: u32, class: Box<dyn ClassMembers>) -> Self {
        Proc {
            id,
            label: label.into(),
            sfx_id,
            vars: VariableRegistry::new(),
            class,
            finished: false,
        }
    }

    pub fn create(&mut self, cycle_idx: u64) -> Result<()> {
        let mut ctx = ProcCtx {
            id: self.id,
            label: &self.label,
            sfx_id: self.sfx_id,
            cycle_idx,
            vars: &mut self.vars,
        };
        self.class.create(&mut ctx)
    }

    pub fn notify(&mut self, cycle_idx: u64, vid: u32, channel: crate::variable::Channel) -> Result<()> {
        let mut ctx = ProcCtx {
            id: self.id,
            label: &self.label,
            sfx_id: self.sfx_id,
            cycle_idx,
            vars: &mut self.vars,
        };
        self.class.notify(&mut ctx, vid, channel)
    }

    pub fn exec(&mut self, cycle_idx: u64) -> Result<()> {
        let mut ctx = ProcCtx {
            id: self.id,
            label: &self.label,
            sfx_id: self.sfx_id,
            cycle_idx,
            vars: &mut self.vars,
        };
        self.class.exec(&mut ctx)
    }

    pub fn destroy(&mut self, cycle_idx: u64) {
        let mut ctx = ProcCtx {
            id: self.id,
            label: &self.label,
            sfx_id: self.sfx_id,
            cycle_idx,
            vars: &mut self.vars,
        };
        self.class.destroy(&mut ctx);
    }
}
