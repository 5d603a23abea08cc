//! `midi_msg`/`midi_split`/`midi_merge`/`recd_merge`/`recd_route` (§4.6).

use crate::buffer::{ChMsg, MidiBuf};
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};
use crate::record::{Record, RecordBuffer};
use crate::value::Value;
use crate::variable::{Channel, VarDescr};

/// Constructs a single MIDI message from component fields on trigger.
pub struct MidiMsg {
    pub output: MidiBuf,
    status: u8,
    ch: u8,
    d0: u8,
    d1: u8,
    triggered: bool,
}

impl MidiMsg {
    pub fn new() -> Self {
        MidiMsg { output: MidiBuf::default(), status: 0, ch: 0, d0: 0, d1: 0, triggered: false }
    }

    pub fn trigger(&mut self, status: u8, ch: u8, d0: u8, d1: u8) {
        self.status = status;
        self.ch = ch;
        self.d0 = d0;
        self.d1 = d1;
        self.triggered = true;
    }
}

impl Default for MidiMsg {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassMembers for MidiMsg {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        if self.triggered {
            self.output = MidiBuf::new(vec![ChMsg {
                sample_idx: 0,
                uid: 0,
                status: self.status,
                ch: self.ch,
                d0: self.d0,
                d1: self.d1,
            }]);
            self.triggered = false;
        } else {
            self.output = MidiBuf::default();
        }
        Ok(())
    }
}

/// Decomposes an mbuf into per-field scalar variables: `status`, `ch`,
/// `d0`, `d1` of the most recent message each cycle.
pub struct MidiSplit {
    pub input: MidiBuf,
    pub last: Option<ChMsg>,
}

impl ClassMembers for MidiSplit {
    fn create(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        ctx.vars.register("status", 0, 0, 1, VarDescr::default());
        ctx.vars.register("ch", 0, 1, 1, VarDescr::default());
        ctx.vars.register("d0", 0, 2, 1, VarDescr::default());
        ctx.vars.register("d1", 0, 3, 1, VarDescr::default());
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ProcCtx) -> Result<()> {
        if let Some(m) = self.input.msgs().last() {
            self.last = Some(*m);
            if let Some(v) = ctx.vars.get_mut("status", 0, 0) {
                v.set(Channel::Any, Value::I32(m.status as i32))?;
            }
            if let Some(v) = ctx.vars.get_mut("ch", 0, 1) {
                v.set(Channel::Any, Value::I32(m.ch as i32))?;
            }
            if let Some(v) = ctx.vars.get_mut("d0", 0, 2) {
                v.set(Channel::Any, Value::I32(m.d0 as i32))?;
            }
            if let Some(v) = ctx.vars.get_mut("d1", 0, 3) {
                v.set(Channel::Any, Value::I32(m.d1 as i32))?;
            }
        }
        Ok(())
    }
}

/// Time-sort-merges multiple mbufs; does a k-way merge whenever 2+ inputs
/// carry events this cycle.
pub struct MidiMerge {
    pub inputs: Vec<MidiBuf>,
    pub output: MidiBuf,
}

impl ClassMembers for MidiMerge {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let mut merged: Vec<ChMsg> = self.inputs.iter().flat_map(|b| b.msgs().iter().copied()).collect();
        merged.sort_by_key(|m| m.sample_idx);
        self.output = MidiBuf::new(merged);
        Ok(())
    }
}

/// Time-sort-merges one or more record-array buffers of a common type
/// (k-way merge by a named time field, analogous to [`MidiMerge`]).
pub struct RecdMerge {
    pub time_field: String,
    pub inputs: Vec<RecordBuffer>,
    pub output: RecordBuffer,
}

impl RecdMerge {
    fn merge(&mut self) -> Result<()> {
        let mut all: Vec<Record> = self.inputs.iter().flat_map(|b| b.live().iter().cloned()).collect();
        all.sort_by(|a, b| {
            let ta = a.field(&self.time_field).and_then(|v| v.to_f64()).unwrap_or(0.0);
            let tb = b.field(&self.time_field).and_then(|v| v.to_f64()).unwrap_or(0.0);
            ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = all.len().min(self.output.capacity());
        self.output.set_recd_n(n)?;
        for (i, rec) in all.drain(..n).enumerate() {
            *self.output.record_mut(i)? = rec;
        }
        Ok(())
    }
}

impl ClassMembers for RecdMerge {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.merge()
    }
}

/// Value-driven record routing by a named selector field: each record is
/// copied to the output bucket whose index equals the selector field's
/// integer value.
pub struct RecdRoute {
    pub selector_field: String,
    pub input: RecordBuffer,
    pub outputs: Vec<RecordBuffer>,
}

impl RecdRoute {
    fn route(&mut self) -> Result<()> {
        for out in &mut self.outputs {
            out.set_recd_n(0)?;
        }
        let mut counts = vec![0usize; self.outputs.len()];
        for rec in self.input.live() {
            let sel = rec.field(&self.selector_field)?.to_i64()? as usize;
            if let Some(out) = self.outputs.get_mut(sel) {
                let idx = counts[sel];
                if idx < out.capacity() {
                    *out.record_mut(idx)? = rec.clone();
                    counts[sel] = idx + 1;
                }
            }
        }
        for (out, &n) in self.outputs.iter_mut().zip(&counts) {
            out.set_recd_n(n)?;
        }
        Ok(())
    }
}

impl ClassMembers for RecdRoute {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.route()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_merge_sorts_by_sample_idx() {
        let mut merge = MidiMerge {
            inputs: vec![
                MidiBuf::new(vec![ChMsg { sample_idx: 20, uid: 0, status: 0x90, ch: 0, d0: 60, d1: 100 }]),
                MidiBuf::new(vec![ChMsg { sample_idx: 5, uid: 0, status: 0x90, ch: 0, d0: 61, d1: 100 }]),
            ],
            output: MidiBuf::default(),
        };
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        merge.create(&mut ctx).unwrap();
        merge.exec(&mut ctx).unwrap();
        let msgs = merge.output.msgs();
        assert_eq!(msgs[0].sample_idx, 5);
        assert_eq!(msgs[1].sample_idx, 20);
    }

    fn time_field_type() -> std::sync::Arc<crate::record::RecordType> {
        crate::record::RecordType::new(
            "timed",
            None,
            vec![crate::record::FieldDescr { name: "t".into(), ty: crate::record::FieldType::F64 }],
        )
    }

    fn timed_buf(ty: &std::sync::Arc<crate::record::RecordType>, times: &[f64]) -> RecordBuffer {
        let mut buf = RecordBuffer::new(ty.clone(), times.len());
        buf.set_recd_n(times.len()).unwrap();
        for (i, &t) in times.iter().enumerate() {
            buf.record_mut(i).unwrap().values[0] = Value::F64(t);
        }
        buf
    }

    #[test]
    fn recd_merge_time_sorts_across_inputs() {
        let ty = time_field_type();
        let mut merge = RecdMerge {
            time_field: "t".into(),
            inputs: vec![timed_buf(&ty, &[2.0, 5.0]), timed_buf(&ty, &[1.0, 4.0])],
            output: RecordBuffer::new(ty.clone(), 4),
        };
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        merge.create(&mut ctx).unwrap();
        merge.exec(&mut ctx).unwrap();
        let times: Vec<f64> = merge.output.live().iter().map(|r| r.field("t").unwrap().to_f64().unwrap()).collect();
        assert_eq!(times, vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn recd_route_execs_from_its_input_field() {
        let ty = crate::record::RecordType::new(
            "routed",
            None,
            vec![crate::record::FieldDescr { name: "bucket".into(), ty: crate::record::FieldType::I32 }],
        );
        let mut input = RecordBuffer::new(ty.clone(), 2);
        input.set_recd_n(2).unwrap();
        input.record_mut(0).unwrap().values[0] = Value::I32(1);
        input.record_mut(1).unwrap().values[0] = Value::I32(0);
        let mut route = RecdRoute {
            selector_field: "bucket".into(),
            input,
            outputs: vec![RecordBuffer::new(ty.clone(), 2), RecordBuffer::new(ty.clone(), 2)],
        };
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        route.create(&mut ctx).unwrap();
        route.exec(&mut ctx).unwrap();
        assert_eq!(route.outputs[0].recd_n(), 1);
        assert_eq!(route.outputs[1].recd_n(), 1);
    }
}
