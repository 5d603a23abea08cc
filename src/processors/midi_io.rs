//! `midi_in`/`midi_out`/`midi_file` (§4.6).

use std::sync::Arc;

use crate::buffer::{ChMsg, MidiBuf};
use crate::device::DeviceRegistry;
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};
use crate::record::{FieldDescr, FieldType, Record, RecordBuffer, RecordType};
use crate::variable::{Channel, VarDescr};

/// Attaches to an external device with optional device/port filtering;
/// publishes to both an mbuf and a record-array (single "midi" field).
pub struct MidiIn {
    pub label: String,
    pub mbuf: MidiBuf,
    pub rbuf: RecordBuffer,
    registry: Arc<dyn DeviceRegistry>,
}

impl MidiIn {
    pub fn new(label: impl Into<String>, registry: Arc<dyn DeviceRegistry>, capacity: usize) -> Self {
        let ty = RecordType::new("midi_in_row", None, vec![FieldDescr { name: "midi".into(), ty: FieldType::I32 }]);
        MidiIn { label: label.into(), mbuf: MidiBuf::default(), rbuf: RecordBuffer::new(ty, capacity), registry }
    }
}

impl ClassMembers for MidiIn {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let msgs = self.registry.read_midi(&self.label)?;
        let n = msgs.len().min(self.rbuf.capacity());
        self.rbuf.set_recd_n(n)?;
        for (i, m) in msgs.iter().take(n).enumerate() {
            let rec = self.rbuf.record_mut(i)?;
            rec.values[0] = crate::value::Value::I32(m.status as i32);
        }
        self.mbuf = MidiBuf::new(msgs);
        Ok(())
    }
}

/// Accepts either an mbuf or a record-array of midi messages and forwards
/// them to an external device.
pub struct MidiOut {
    pub label: String,
    pub mbuf: MidiBuf,
    registry: Arc<dyn DeviceRegistry>,
}

impl MidiOut {
    pub fn new(label: impl Into<String>, registry: Arc<dyn DeviceRegistry>) -> Self {
        MidiOut { label: label.into(), mbuf: MidiBuf::default(), registry }
    }
}

impl ClassMembers for MidiOut {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        self.registry.write_midi(&self.label, self.mbuf.msgs())
    }
}

/// The external MIDI-file reader collaborator's minimal surface: raw
/// `(amicro, uid, status, ch, d0, d1)` tuples per §6.
pub trait MidiFileSource: Send {
    fn messages(&self) -> &[(u64, u32, u8, u8, u8, u8)];
}

/// Parses messages from a source file via the external MIDI-file
/// collaborator; emits messages whose sample-index has been reached since
/// the previous cycle; supports start/stop; on stop or completion emits an
/// all-notes-off plus a reset-all-controllers synthesised message.
pub struct MidiFile {
    pub output: MidiBuf,
    source: Box<dyn MidiFileSource>,
    srate: f64,
    converted: Vec<ChMsg>,
    first_msg_idx: usize,
    next_idx: usize,
    cur_sample_idx: u64,
    block_n: u64,
    running: bool,
}

impl MidiFile {
    pub fn new(source: Box<dyn MidiFileSource>, srate: f64, block_n: u64) -> Self {
        let converted: Vec<ChMsg> = source
            .messages()
            .iter()
            .map(|&(amicro, uid, status, ch, d0, d1)| ChMsg {
                sample_idx: (srate * amicro as f64 / 1_000_000.0) as u32,
                uid,
                status,
                ch,
                d0,
                d1,
            })
            .collect();
        let first_msg_idx = compute_first_msg_idx(&converted);
        let cur_sample_idx = converted.get(first_msg_idx).map(|m| m.sample_idx as u64).unwrap_or(0);
        MidiFile {
            output: MidiBuf::default(),
            source,
            srate,
            converted,
            first_msg_idx,
            next_idx: first_msg_idx,
            cur_sample_idx,
            block_n,
            running: true,
        }
    }

    pub fn first_msg_idx(&self) -> usize {
        self.first_msg_idx
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }
}

/// Computes the "first-msg index": the earliest pedal-down that is still
/// held at the first note-on, else the first note-on. Replay must restore
/// pedal state (§4.6).
fn compute_first_msg_idx(msgs: &[ChMsg]) -> usize {
    let first_note_on = msgs.iter().position(|m| m.is_note_on());
    let Some(note_on_idx) = first_note_on else { return 0 };

    let mut held_pedal_idx: Option<usize> = None;
    for (i, m) in msgs.iter().enumerate().take(note_on_idx) {
        if (m.status & 0xF0) == ChMsg::CONTROL_CHANGE && m.d0 == ChMsg::CTL_SUSTAIN {
            if m.d1 >= 64 {
                if held_pedal_idx.is_none() {
                    held_pedal_idx = Some(i);
                }
            } else {
                held_pedal_idx = None;
            }
        }
    }
    held_pedal_idx.unwrap_or(note_on_idx)
}

impl ClassMembers for MidiFile {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn notify(&mut self, ctx: &mut ProcCtx, vid: u32, _channel: Channel) -> Result<()> {
        let _ = ctx;
        let _ = vid;
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        if !self.running {
            self.output = MidiBuf::new(all_notes_off_and_reset());
            return Ok(());
        }
        let window_end = self.cur_sample_idx + self.block_n;
        let mut batch = Vec::new();
        while self.next_idx < self.converted.len()
            && (self.converted[self.next_idx].sample_idx as u64) < window_end
        {
            batch.push(self.converted[self.next_idx]);
            self.next_idx += 1;
        }
        self.cur_sample_idx = window_end;
        if self.next_idx >= self.converted.len() && batch.is_empty() {
            self.output = MidiBuf::new(all_notes_off_and_reset());
            self.running = false;
        } else {
            self.output = MidiBuf::new(batch);
        }
        Ok(())
    }
}

fn all_notes_off_and_reset() -> Vec<ChMsg> {
    vec![
        ChMsg { sample_idx: 0, uid: 0, status: ChMsg::CONTROL_CHANGE, ch: 0, d0: ChMsg::CTL_ALL_NOTES_OFF, d1: 0 },
        ChMsg { sample_idx: 0, uid: 0, status: ChMsg::CONTROL_CHANGE, ch: 0, d0: ChMsg::CTL_RESET_ALL_CONTROLLERS, d1: 0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<(u64, u32, u8, u8, u8, u8)>);
    impl MidiFileSource for FixedSource {
        fn messages(&self) -> &[(u64, u32, u8, u8, u8, u8)] {
            &self.0
        }
    }

    #[test]
    fn first_msg_index_restores_held_pedal() {
        // sustain-down @100ms, note-on @200ms
        let source = FixedSource(vec![
            (100_000, 1, ChMsg::CONTROL_CHANGE, 0, ChMsg::CTL_SUSTAIN, 127),
            (200_000, 2, ChMsg::NOTE_ON, 0, 60, 100),
        ]);
        let file = MidiFile::new(Box::new(source), 48_000.0, 512);
        assert_eq!(file.first_msg_idx(), 0);
        assert_eq!(file.cur_sample_idx, (48_000.0 * 0.1) as u64);
    }

    #[test]
    fn first_msg_index_is_note_on_when_no_pedal_held() {
        let source = FixedSource(vec![
            (50_000, 1, ChMsg::CONTROL_CHANGE, 0, ChMsg::CTL_SUSTAIN, 0),
            (200_000, 2, ChMsg::NOTE_ON, 0, 60, 100),
        ]);
        let file = MidiFile::new(Box::new(source), 48_000.0, 512);
        assert_eq!(file.first_msg_idx(), 1);
    }
}
