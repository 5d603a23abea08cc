//! The static score model built by [`super::parse`] (§4.8, `cwSfScoreParser`):
//! events in CSV order, locations coalesced by score time, variable-type
//! sets, and the sections that tile the event space.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The opcode column of a score CSV row (§6 "Score CSV file").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Bar,
    Sec,
    Bpm,
    NoteOn,
    NoteOff,
    Pedal,
    Rest,
    Ctl,
}

impl Opcode {
    pub fn from_label(label: &str) -> Result<Self> {
        Ok(match label {
            "bar" => Opcode::Bar,
            "sec" => Opcode::Sec,
            "bpm" => Opcode::Bpm,
            "non" => Opcode::NoteOn,
            "nof" => Opcode::NoteOff,
            "ped" => Opcode::Pedal,
            "rst" => Opcode::Rest,
            "ctl" => Opcode::Ctl,
            other => return Err(Error::SyntaxError { context: "opcode".into(), message: format!("unknown opcode {other}") }),
        })
    }
}

/// A variable-type flag from the `dyn`/`even`/`tempo` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    Dyn,
    Even,
    Tempo,
}

impl SetKind {
    pub fn from_char(c: char) -> Option<(Self, bool)> {
        match c {
            'd' => Some((SetKind::Dyn, false)),
            'D' => Some((SetKind::Dyn, true)),
            'e' => Some((SetKind::Even, false)),
            'E' => Some((SetKind::Even, true)),
            't' => Some((SetKind::Tempo, false)),
            'T' => Some((SetKind::Tempo, true)),
            _ => None,
        }
    }

    /// The minimum distinct-location count every completed set of this kind
    /// must span (§8 "score model": even >= 3, tempo >= 2; dyn unconstrained).
    pub fn min_loc_count(self) -> usize {
        match self {
            SetKind::Even => 3,
            SetKind::Tempo => 2,
            SetKind::Dyn => 0,
        }
    }
}

/// Per-event performance state, rewound by [`Score::clear_all_performance_data`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfState {
    pub perf_fl: bool,
    pub perf_cnt: u32,
    pub perf_sec: f64,
    pub perf_vel: u8,
    pub perf_dyn_level: u32,
    pub perf_match_cost: f64,
}

/// One note-on/note-off/control row from the score, in CSV (input) order.
#[derive(Debug, Clone)]
pub struct Event {
    pub index: usize,
    pub csv_row: usize,
    pub op: Opcode,
    pub bar: u32,
    pub pitch: u8,
    pub vel: u8,
    pub bar_pitch_index: u32,
    pub sec: f64,
    pub loc_id: usize,
    /// Which set (by index into [`Score::sets`]) this event is a member of,
    /// per variable kind.
    pub set_of: HashMap<SetKind, usize>,
    pub section_idx: usize,
    pub perf: PerfState,
}

impl Event {
    /// A 32-bit value that uniquely identifies a note-on by
    /// `(op, bar, pitch, bar_pitch_index)` (§4.8).
    pub fn hash(&self) -> u32 {
        let op = self.op as u32;
        op.wrapping_mul(0x9E37_79B1)
            ^ self.bar.wrapping_mul(0x85EB_CA6B)
            ^ (self.pitch as u32).wrapping_mul(0xC2B2_AE35)
            ^ self.bar_pitch_index
    }

    pub fn is_note_on(&self) -> bool {
        self.op == Opcode::NoteOn
    }
}

/// Events coalesced by equal score seconds; `loc_id == loc_index`.
#[derive(Debug, Clone)]
pub struct Location {
    pub loc_id: usize,
    pub sec: f64,
    pub event_indices: Vec<usize>,
}

/// A run of consecutive events sharing a variable-type flag, ended by its
/// uppercase end-of-set flag.
#[derive(Debug, Clone)]
pub struct Set {
    pub kind: SetKind,
    pub event_indices: Vec<usize>,
    pub target_section: Option<String>,
}

/// A labelled, contiguous span of events.
#[derive(Debug, Clone)]
pub struct Section {
    pub label: String,
    pub beg_event: usize,
    pub end_event: usize,
}

/// The complete parsed score: events, locations, sets and sections, plus
/// the query surface used by the matcher/tracker (§4.8).
#[derive(Debug, Clone, Default)]
pub struct Score {
    pub events: Vec<Event>,
    pub locations: Vec<Location>,
    pub sets: Vec<Set>,
    pub sections: Vec<Section>,
    hash_index: HashMap<u32, usize>,
    bar_index: HashMap<u32, Vec<usize>>,
}

impl Score {
    pub fn new(events: Vec<Event>, locations: Vec<Location>, sets: Vec<Set>, sections: Vec<Section>) -> Self {
        let mut hash_index = HashMap::new();
        let mut bar_index: HashMap<u32, Vec<usize>> = HashMap::new();
        for e in &events {
            if e.is_note_on() {
                hash_index.insert(e.hash(), e.index);
            }
            bar_index.entry(e.bar).or_default().push(e.index);
        }
        Score { events, locations, sets, sections, hash_index, bar_index }
    }

    pub fn event(&self, index: usize) -> Result<&Event> {
        self.events.get(index).ok_or_else(|| Error::InvalidId(format!("event index {index}")))
    }

    pub fn hash_to_event(&self, hash: u32) -> Option<&Event> {
        self.hash_index.get(&hash).map(|&i| &self.events[i])
    }

    pub fn bar_to_event(&self, bar: u32) -> &[usize] {
        self.bar_index.get(&bar).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn event_index_to_section(&self, index: usize) -> Option<&Section> {
        self.sections.iter().find(|s| s.beg_event <= index && index <= s.end_event)
    }

    pub fn are_all_loc_set_events_performed(&self, loc_id: usize) -> bool {
        self.locations
            .get(loc_id)
            .map(|loc| loc.event_indices.iter().all(|&i| self.events[i].perf.perf_fl))
            .unwrap_or(false)
    }

    pub fn set_perf(&mut self, event_index: usize, sec: f64, vel: u8, dyn_level: u32, match_cost: f64) -> Result<()> {
        let e = self.events.get_mut(event_index).ok_or_else(|| Error::InvalidId(format!("event index {event_index}")))?;
        e.perf.perf_fl = true;
        e.perf.perf_cnt += 1;
        e.perf.perf_sec = sec;
        e.perf.perf_vel = vel;
        e.perf.perf_dyn_level = dyn_level;
        e.perf.perf_match_cost = match_cost;
        Ok(())
    }

    pub fn clear_all_performance_data(&mut self) {
        for e in &mut self.events {
            e.perf = PerfState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_score() -> Score {
        let events = vec![
            Event { index: 0, csv_row: 1, op: Opcode::NoteOn, bar: 1, pitch: 60, vel: 80, bar_pitch_index: 0, sec: 0.0, loc_id: 0, set_of: HashMap::new(), section_idx: 0, perf: PerfState::default() },
            Event { index: 1, csv_row: 2, op: Opcode::NoteOn, bar: 1, pitch: 64, vel: 80, bar_pitch_index: 1, sec: 0.5, loc_id: 1, set_of: HashMap::new(), section_idx: 0, perf: PerfState::default() },
        ];
        let locations = vec![
            Location { loc_id: 0, sec: 0.0, event_indices: vec![0] },
            Location { loc_id: 1, sec: 0.5, event_indices: vec![1] },
        ];
        let sections = vec![Section { label: "A".into(), beg_event: 0, end_event: 1 }];
        Score::new(events, locations, Vec::new(), sections)
    }

    #[test]
    fn every_event_belongs_to_exactly_one_section() {
        let score = make_score();
        for e in &score.events {
            let sec = score.event_index_to_section(e.index).unwrap();
            assert!(sec.beg_event <= e.index && e.index <= sec.end_event);
        }
    }

    #[test]
    fn hash_lookup_round_trips_note_on_events() {
        let score = make_score();
        let e = score.event(0).unwrap();
        let hash = e.hash();
        assert_eq!(score.hash_to_event(hash).unwrap().index, 0);
    }

    #[test]
    fn set_perf_then_clear_round_trips() {
        let mut score = make_score();
        score.set_perf(0, 0.01, 90, 3, 0.0).unwrap();
        assert!(score.events[0].perf.perf_fl);
        assert!(score.are_all_loc_set_events_performed(0));
        assert!(!score.are_all_loc_set_events_performed(1));
        score.clear_all_performance_data();
        assert!(!score.events[0].perf.perf_fl);
    }
}
