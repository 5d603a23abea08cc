//! Flow and configuration glue classes (§4.6, last bullet): small processors
//! that exist to wire constants, counters, and UI-facing lists into a
//! network rather than to perform DSP.

use crate::error::{Error, Result};
use crate::proc::{ClassMembers, ProcCtx};
use crate::value::Value;
use crate::variable::{Channel, VarDescr};

/// Counts down from a configured cycle count, firing `done` once.
pub struct Timer {
    pub period_cycles: u32,
    elapsed: u32,
    fired: bool,
}

impl Timer {
    pub fn new(period_cycles: u32) -> Self {
        Timer { period_cycles, elapsed: 0, fired: false }
    }

    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.fired = false;
    }
}

impl ClassMembers for Timer {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("done", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        if self.fired {
            return Ok(());
        }
        self.elapsed += 1;
        if self.elapsed >= self.period_cycles {
            self.fired = true;
            if let Some(v) = ctx.vars.get_mut("done", 0, 0) {
                v.set(Channel::Any, Value::Bool(true))?;
            }
        }
        Ok(())
    }
}

/// Accumulates a signed step on every `notify` of its `trigger` variable.
pub struct Counter {
    pub value: i64,
    step: i64,
}

impl Counter {
    pub fn new(step: i64) -> Self {
        Counter { value: 0, step }
    }
}

impl ClassMembers for Counter {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("trigger", 0, 0, 1, VarDescr::default());
        ctx.vars.register("value", 0, 1, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            self.value += self.step;
            if let Some(v) = ctx.vars.get_mut("value", 0, 1) {
                v.set(Channel::Any, Value::I64(self.value))?;
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Publishes a constant scalar, set once at `create` from the owning proc's
/// configuration and never changed at runtime.
pub struct Number {
    pub value: Value,
}

impl Number {
    pub fn new(value: Value) -> Self {
        Number { value }
    }
}

impl ClassMembers for Number {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        let v = ctx.vars.register("value", 0, 0, 1, VarDescr::default());
        v.set(Channel::Any, self.value.clone())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Latches the most recent value written to `in`, forwarding to `out` only
/// when `commit` fires — a manually-gated value holder.
pub struct Register {
    pending: Option<Value>,
    pub committed: Option<Value>,
}

impl Register {
    pub fn new() -> Self {
        Register { pending: None, committed: None }
    }
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassMembers for Register {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("in", 0, 0, 1, VarDescr::default());
        ctx.vars.register("commit", 0, 1, 1, VarDescr::default());
        ctx.vars.register("out", 0, 2, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        match vid {
            0 => {
                if let Some(v) = ctx.vars.get("in", 0, 0).and_then(|v| v.get(Channel::Any)) {
                    self.pending = Some(v.clone());
                }
            }
            1 => {
                if let Some(v) = self.pending.take() {
                    self.committed = Some(v.clone());
                    if let Some(out) = ctx.vars.get_mut("out", 0, 2) {
                        out.set(Channel::Any, v)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Sums its inputs into `sum` on every `notify`.
pub struct Add {
    pub inputs: Vec<f64>,
}

impl ClassMembers for Add {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("sum", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        let sum: f64 = self.inputs.iter().sum();
        if let Some(v) = ctx.vars.get_mut("sum", 0, 0) {
            v.set(Channel::Any, Value::F64(sum))?;
        }
        Ok(())
    }
}

/// Publishes a fixed `Vec<Value>` as an enumerated choice list for UI
/// surfacing (§3 "enumerated choices").
pub struct ValueList {
    pub values: Vec<Value>,
}

impl ClassMembers for ValueList {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        let v = ctx.vars.register(
            "list",
            0,
            0,
            1,
            VarDescr { value_list: self.values.clone(), ..VarDescr::default() },
        );
        if let Some(first) = self.values.first() {
            v.set(Channel::Any, first.clone())?;
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Like [`ValueList`] but each entry carries a distinct display label,
/// read back by index.
pub struct LabelValueList {
    pub entries: Vec<(String, Value)>,
    selected: usize,
}

impl LabelValueList {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        LabelValueList { entries, selected: 0 }
    }

    pub fn select(&mut self, idx: usize) -> Result<()> {
        if idx >= self.entries.len() {
            return Err(Error::InvalidArgument(format!("label_value_list index {idx} out of range")));
        }
        self.selected = idx;
        Ok(())
    }

    pub fn selected(&self) -> &(String, Value) {
        &self.entries[self.selected]
    }
}

impl ClassMembers for LabelValueList {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("out", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        if let Some(v) = ctx.vars.get_mut("out", 0, 0) {
            let (_, value) = self.entries[self.selected].clone();
            v.set(Channel::Any, value)?;
        }
        Ok(())
    }
}

/// A plain string enumeration, the `Str`-only specialization of
/// [`LabelValueList`] used for UI dropdowns over names rather than values.
pub struct StringList {
    pub items: Vec<String>,
}

impl ClassMembers for StringList {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("items", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Glue between the `gutim` GUI's programme-selection message table and the
/// network's preset machinery: maps a received program-select row onto a
/// `(proc label, sfx_id, preset name)` triple.
pub struct GutimPsMsgTable {
    pub rows: Vec<(u32, String, u32, String)>,
    pending: Option<usize>,
}

impl GutimPsMsgTable {
    pub fn new(rows: Vec<(u32, String, u32, String)>) -> Self {
        GutimPsMsgTable { rows, pending: None }
    }

    pub fn lookup(&self, program: u32) -> Option<(&str, u32, &str)> {
        self.rows
            .iter()
            .find(|(p, ..)| *p == program)
            .map(|(_, label, sfx_id, preset)| (label.as_str(), *sfx_id, preset.as_str()))
    }

    /// Takes the program-select match queued by the last `notify`, if any.
    pub fn take_request(&mut self) -> Option<(&str, u32, &str)> {
        let idx = self.pending.take()?;
        let (_, label, sfx_id, preset) = &self.rows[idx];
        Some((label.as_str(), *sfx_id, preset.as_str()))
    }
}

impl ClassMembers for GutimPsMsgTable {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("program", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            if let Some(program) = ctx.vars.get("program", 0, 0).and_then(|v| v.get(Channel::Any)).and_then(|v| v.to_i64().ok()) {
                self.pending = self.rows.iter().position(|(p, ..)| *p as i64 == program);
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Glue between the `gutim` GUI's "take" menu and a selectable list of named
/// actions; `selected_action()` is read by the embedder to dispatch.
pub struct GutimTakeMenu {
    pub actions: Vec<String>,
    selected: Option<usize>,
}

impl GutimTakeMenu {
    pub fn new(actions: Vec<String>) -> Self {
        GutimTakeMenu { actions, selected: None }
    }

    pub fn choose(&mut self, idx: usize) -> Result<()> {
        if idx >= self.actions.len() {
            return Err(Error::InvalidArgument(format!("take menu index {idx} out of range")));
        }
        self.selected = Some(idx);
        Ok(())
    }

    pub fn selected_action(&self) -> Option<&str> {
        self.selected.map(|i| self.actions[i].as_str())
    }
}

impl ClassMembers for GutimTakeMenu {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("select", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            if let Some(idx) = ctx.vars.get("select", 0, 0).and_then(|v| v.get(Channel::Any)).and_then(|v| v.to_i64().ok()) {
                let _ = self.choose(idx as usize);
            }
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Starts, stops, and seeks the network's score-following transport; a thin
/// façade other classes (UI, MIDI input) can drive without reaching into the
/// `score` module directly.
pub struct ScorePlayerCtl {
    pub playing: bool,
    pub loc_idx: usize,
}

impl ScorePlayerCtl {
    pub fn new() -> Self {
        ScorePlayerCtl { playing: false, loc_idx: 0 }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn seek(&mut self, loc_idx: usize) {
        self.loc_idx = loc_idx;
    }
}

impl Default for ScorePlayerCtl {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassMembers for ScorePlayerCtl {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Applies a named preset to its owning network on `notify` of `trigger`.
/// The network reference is supplied indirectly: this class only flips a
/// flag the embedder polls via [`Preset::take_request`], since a proc has no
/// handle to the network that contains it (§5 "a proc never sees its own
/// network").
pub struct Preset {
    pub name: String,
    requested: bool,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Preset { name: name.into(), requested: false }
    }

    pub fn take_request(&mut self) -> Option<&str> {
        if self.requested {
            self.requested = false;
            Some(&self.name)
        } else {
            None
        }
    }
}

impl ClassMembers for Preset {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("trigger", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn notify(&mut self, _ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        if vid == 0 {
            self.requested = true;
        }
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }
}

/// Emits a diagnostic log line every cycle, or only on `notify`, depending
/// on `on_exec`.
pub struct Print {
    pub label: String,
    pub on_exec: bool,
}

impl ClassMembers for Print {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn notify(&mut self, _ctx: &mut ProcCtx, vid: u32, channel: Channel) -> Result<()> {
        tracing::info!(label = %self.label, vid, ?channel, "print");
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        if self.on_exec {
            tracing::info!(label = %self.label, cycle = ctx.cycle_idx, "print");
        }
        Ok(())
    }
}

/// Converts into end-of-file the first time it executes; a scripted way to
/// terminate a network after a fixed point rather than waiting on a file
/// reader to run dry.
pub struct Halt;

impl ClassMembers for Halt {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Err(Error::EndOfFile)
    }
}

/// Fires its `done` variable exactly once, on the network's first cycle;
/// used to trigger one-shot setup actions (e.g. a `preset` application)
/// without tying them to `create`, which runs before connections exist.
pub struct OnStart {
    fired: bool,
}

impl OnStart {
    pub fn new() -> Self {
        OnStart { fired: false }
    }
}

impl Default for OnStart {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassMembers for OnStart {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("done", 0, 0, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        if !self.fired {
            self.fired = true;
            if let Some(v) = ctx.vars.get_mut("done", 0, 0) {
                v.set(Channel::Any, Value::Bool(true))?;
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
    fn timer_fires_done_once_period_elapses() {
        let mut vars = VariableRegistry::new();
        let mut timer = Timer::new(3);
        timer.create(&mut dummy_ctx(&mut vars)).unwrap();
        for _ in 0..2 {
            timer.exec(&mut dummy_ctx(&mut vars)).unwrap();
            assert!(vars.get("done", 0, 0).unwrap().get(Channel::Any).is_none());
        }
        timer.exec(&mut dummy_ctx(&mut vars)).unwrap();
        assert_eq!(vars.get("done", 0, 0).unwrap().get(Channel::Any), Some(&Value::Bool(true)));
    }

    #[test]
    fn register_only_forwards_on_commit() {
        let mut vars = VariableRegistry::new();
        let mut reg = Register::new();
        reg.create(&mut dummy_ctx(&mut vars)).unwrap();
        reg.notify(&mut dummy_ctx(&mut vars), 0, Channel::Any).unwrap();
        assert!(reg.committed.is_none());
        vars.get_mut("in", 0, 0).unwrap().set(Channel::Any, Value::I32(42)).unwrap();
        reg.notify(&mut dummy_ctx(&mut vars), 0, Channel::Any).unwrap();
        reg.notify(&mut dummy_ctx(&mut vars), 1, Channel::Any).unwrap();
        assert_eq!(reg.committed, Some(Value::I32(42)));
    }

    #[test]
    fn halt_converts_to_end_of_file_on_first_exec() {
        let mut vars = VariableRegistry::new();
        let mut halt = Halt;
        assert!(matches!(halt.exec(&mut dummy_ctx(&mut vars)), Err(Error::EndOfFile)));
    }

    #[test]
    fn gutim_ps_msg_table_looks_up_by_program_number() {
        let table = GutimPsMsgTable::new(vec![(3, "reverb".into(), 0, "wet".into())]);
        assert_eq!(table.lookup(3), Some(("reverb", 0, "wet")));
        assert_eq!(table.lookup(9), None);
    }

    #[test]
    fn gutim_ps_msg_table_execs_program_select_via_notify() {
        let mut vars = VariableRegistry::new();
        let mut table = GutimPsMsgTable::new(vec![(3, "reverb".into(), 0, "wet".into())]);
        table.create(&mut dummy_ctx(&mut vars)).unwrap();
        vars.get_mut("program", 0, 0).unwrap().set(Channel::Any, Value::I32(3)).unwrap();
        table.notify(&mut dummy_ctx(&mut vars), 0, Channel::Any).unwrap();
        assert_eq!(table.take_request(), Some(("reverb", 0, "wet")));
        assert_eq!(table.take_request(), None);
    }

    #[test]
    fn gutim_take_menu_execs_selection_via_notify() {
        let mut vars = VariableRegistry::new();
        let mut menu = GutimTakeMenu::new(vec!["save".into(), "load".into()]);
        menu.create(&mut dummy_ctx(&mut vars)).unwrap();
        vars.get_mut("select", 0, 0).unwrap().set(Channel::Any, Value::I32(1)).unwrap();
        menu.notify(&mut dummy_ctx(&mut vars), 0, Channel::Any).unwrap();
        assert_eq!(menu.selected_action(), Some("load"));
    }
}
