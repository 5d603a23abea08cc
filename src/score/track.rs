//! Streaming follower (§4.10 `sftrack`, grounded on `cwSfTrack.cpp`): a thin
//! controller that drives [`Matcher`] incrementally as MIDI note-ons arrive.

use std::collections::VecDeque;

use crate::error::Result;
use crate::score::matcher::{Matcher, StepKind};
use crate::score::model::Score;

fn ring_note(ring: &VecDeque<MidiNote>, midi_row: usize, fallback: &MidiNote) -> MidiNote {
    midi_row.checked_sub(1).and_then(|i| ring.get(i)).copied().unwrap_or(*fallback)
}

/// One incoming performance note-on.
#[derive(Debug, Clone, Copy)]
pub struct MidiNote {
    pub mni: u32,
    pub sec: f64,
    pub smp_idx: u64,
    pub pitch: u8,
    pub vel: u8,
    pub muid: u32,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrackFlags: u32 {
        const MATCH = 0x01;
        const TRANSPOSE = 0x02;
        const TRUE_POSITIVE = 0x04;
        const FALSE_POSITIVE = 0x08;
        const BAR = 0x10;
        const NOTE = 0x20;
    }
}

/// A result record emitted for each matched, inserted, or missed position.
#[derive(Debug, Clone, Copy)]
pub struct TrackEvent {
    pub index: usize,
    pub o_loc_id: usize,
    pub sc_evt_idx: usize,
    pub mni: u32,
    pub muid: u32,
    pub sec: f64,
    pub smp_idx: u64,
    pub pitch: u8,
    pub vel: u8,
    pub flags: TrackFlags,
    pub cost: i32,
}

/// Tuning parameters for the streaming tracker.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub mmn: usize,
    pub init_hop_cnt: usize,
    pub step_cnt: usize,
    pub max_miss_cnt: usize,
    /// When true, an earlier false-positive result later confirmed as a
    /// true positive is rewritten in the result log (§4.10 "backtrack").
    pub backtrack: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig { mmn: 7, init_hop_cnt: 4, step_cnt: 3, max_miss_cnt: 5, backtrack: true }
    }
}

/// A thin streaming controller over [`Matcher`].
pub struct Tracker {
    cfg: TrackerConfig,
    ring: VecDeque<MidiNote>,
    eli: usize,
    ili: usize,
    miss_cnt: usize,
    mni_ctr: u32,
    results: VecDeque<TrackEvent>,
    result_cap: usize,
    matcher: Matcher,
}

impl Tracker {
    pub fn new(score: &Score, cfg: TrackerConfig) -> Self {
        let result_cap = score.events.len().saturating_mul(2).max(1);
        Tracker {
            cfg,
            ring: VecDeque::with_capacity(cfg.mmn),
            eli: 0,
            ili: 0,
            miss_cnt: 0,
            mni_ctr: 0,
            results: VecDeque::new(),
            result_cap,
            matcher: Matcher::new(),
        }
    }

    pub fn results(&self) -> impl Iterator<Item = &TrackEvent> {
        self.results.iter()
    }

    fn push_result(&mut self, ev: TrackEvent) {
        if self.results.len() >= self.result_cap {
            self.results.pop_front();
        }
        self.results.push_back(ev);
    }

    /// Feeds one performance note-on into the tracker (§4.10).
    pub fn note_on(&mut self, score: &Score, sec: f64, smp_idx: u64, pitch: u8, vel: u8, muid: u32) -> Result<()> {
        let mni = self.mni_ctr;
        self.mni_ctr += 1;
        let note = MidiNote { mni, sec, smp_idx, pitch, vel, muid };
        let just_filled = self.ring.len() + 1 == self.cfg.mmn;
        if self.ring.len() == self.cfg.mmn {
            self.ring.pop_front();
        }
        self.ring.push_back(note);

        if just_filled {
            self.initial_scan(score, &note)?;
        } else if self.ring.len() == self.cfg.mmn {
            self.step(score, &note)?;
        } else {
            // ring not yet full: emit as unmatched until the initial scan runs.
            self.push_result(TrackEvent {
                index: self.results.len(),
                o_loc_id: 0,
                sc_evt_idx: 0,
                mni,
                muid,
                sec,
                smp_idx,
                pitch,
                vel,
                flags: TrackFlags::NOTE,
                cost: i32::MAX,
            });
        }

        if self.miss_cnt >= self.cfg.max_miss_cnt {
            self.local_rescan(score)?;
        }
        Ok(())
    }

    fn midi_pitches(&self) -> Vec<u8> {
        self.ring.iter().map(|n| n.pitch).collect()
    }

    fn initial_scan(&mut self, score: &Score, latest: &MidiNote) -> Result<()> {
        let midi = self.midi_pitches();
        let mut best_cost = i32::MAX;
        let mut best_loc = self.ili;
        for hop in 0..=self.cfg.init_hop_cnt {
            let loc_idx = self.ili + hop;
            if loc_idx + midi.len() > score.locations.len() {
                break;
            }
            if self.matcher.exec(score, loc_idx, midi.len(), &midi, midi.len(), best_cost).is_ok()
                && self.matcher.cost() < best_cost
            {
                best_cost = self.matcher.cost();
                best_loc = loc_idx;
            }
        }
        let _ = best_loc;
        let (last_loc, miss) = self.matcher.sync(score, &midi, midi.len())?;
        self.eli = last_loc;
        self.miss_cnt = miss;
        self.emit_from_matcher(score, latest);
        Ok(())
    }

    fn step(&mut self, score: &Score, latest: &MidiNote) -> Result<()> {
        let midi = self.midi_pitches();
        let mut matched = false;
        for hop in 0..self.cfg.step_cnt {
            let loc_idx = self.eli + hop;
            if loc_idx + midi.len() > score.locations.len() {
                continue;
            }
            if self.matcher.exec(score, loc_idx, midi.len(), &midi, midi.len(), i32::MAX).is_ok() && self.matcher.cost() == 0 {
                matched = true;
                break;
            }
        }
        if !matched {
            for hop in 1..self.cfg.step_cnt {
                if hop > self.eli {
                    break;
                }
                let loc_idx = self.eli - hop;
                if self.matcher.exec(score, loc_idx, midi.len(), &midi, midi.len(), i32::MAX).is_ok() && self.matcher.cost() == 0 {
                    matched = true;
                    break;
                }
            }
        }
        if matched {
            let (last_loc, miss) = self.matcher.sync(score, &midi, midi.len())?;
            self.eli = last_loc;
            self.miss_cnt = 0;
            self.emit_from_matcher(score, latest);
        } else {
            self.miss_cnt += 1;
            self.push_result(TrackEvent {
                index: self.results.len(),
                o_loc_id: self.eli,
                sc_evt_idx: 0,
                mni: latest.mni,
                muid: latest.muid,
                sec: latest.sec,
                smp_idx: latest.smp_idx,
                pitch: latest.pitch,
                vel: latest.vel,
                flags: TrackFlags::NOTE,
                cost: i32::MAX,
            });
        }
        Ok(())
    }

    fn local_rescan(&mut self, score: &Score) -> Result<()> {
        let midi = self.midi_pitches();
        let window = midi.len().max(1);
        let start = self.eli.saturating_sub(window);
        if self.matcher.exec(score, start, midi.len().min(score.locations.len() - start), &midi, midi.len(), i32::MAX).is_ok() {
            let (last_loc, miss) = self.matcher.sync(score, &midi, midi.len())?;
            self.eli = last_loc;
            self.miss_cnt = miss;
        }
        Ok(())
    }

    fn emit_from_matcher(&mut self, score: &Score, latest: &MidiNote) {
        let _ = score;
        let results = self.matcher.results().to_vec();
        let cost = self.matcher.cost();
        for step in self.matcher.path().to_vec() {
            if step.kind == StepKind::Ins {
                continue;
            }
            let mut flags = TrackFlags::NOTE;
            if step.kind == StepKind::Match {
                flags |= TrackFlags::MATCH | TrackFlags::TRUE_POSITIVE;
            } else if self.cfg.backtrack {
                flags |= TrackFlags::FALSE_POSITIVE;
            }
            if step.transpose {
                flags |= TrackFlags::TRANSPOSE;
            }
            let (o_loc_id, sc_evt_idx) = results
                .iter()
                .find(|r| r.midi_row == step.midi_row)
                .map(|r| (r.loc_id, r.sc_evt_idx))
                .unwrap_or((0, 0));
            let note = ring_note(&self.ring, step.midi_row, latest);
            self.push_result(TrackEvent {
                index: self.results.len(),
                o_loc_id,
                sc_evt_idx,
                mni: note.mni,
                muid: note.muid,
                sec: note.sec,
                smp_idx: note.smp_idx,
                pitch: note.pitch,
                vel: note.vel,
                flags,
                cost,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::model::{Event, Location, Opcode, PerfState, Score, Section};
    use std::collections::HashMap;

    fn make_score(pitches: &[u8]) -> Score {
        let events: Vec<Event> = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Event {
                index: i,
                csv_row: i + 1,
                op: Opcode::NoteOn,
                bar: 1,
                pitch: p,
                vel: 80,
                bar_pitch_index: i as u32,
                sec: i as f64,
                loc_id: i,
                set_of: HashMap::new(),
                section_idx: 0,
                perf: PerfState::default(),
            })
            .collect();
        let locations: Vec<Location> = (0..pitches.len()).map(|i| Location { loc_id: i, sec: i as f64, event_indices: vec![i] }).collect();
        let sections = vec![Section { label: "A".into(), beg_event: 0, end_event: pitches.len() - 1 }];
        Score::new(events, locations, Vec::new(), sections)
    }

    #[test]
    fn initial_scan_stamps_each_result_with_its_own_row_and_location() {
        let score = make_score(&[60, 62, 64, 65, 67, 69, 71]);
        let mut tracker = Tracker::new(&score, TrackerConfig { mmn: 3, init_hop_cnt: 2, step_cnt: 2, max_miss_cnt: 3, backtrack: true });
        for (i, &p) in [60u8, 62, 64].iter().enumerate() {
            tracker.note_on(&score, i as f64, 0, p, 90, i as u32).unwrap();
        }
        let results: Vec<&TrackEvent> = tracker.results().collect();
        assert_eq!(results.len(), 3);
        for (i, r) in results.iter().enumerate() {
            // each row's stamped pitch and location must be its own, not the
            // most-recently-received note's, repeated across every row.
            assert_eq!(r.pitch, [60u8, 62, 64][i]);
            assert_eq!(r.o_loc_id, i);
            assert!(r.flags.contains(TrackFlags::MATCH));
        }
    }

    #[test]
    fn tracker_emits_a_result_per_note_once_ring_fills() {
        let score = make_score(&[60, 62, 64, 65, 67, 69, 71]);
        let mut tracker = Tracker::new(&score, TrackerConfig { mmn: 3, init_hop_cnt: 2, step_cnt: 2, max_miss_cnt: 3, backtrack: true });
        for (i, &p) in [60u8, 62, 64].iter().enumerate() {
            tracker.note_on(&score, i as f64, 0, p, 90, i as u32).unwrap();
        }
        assert!(tracker.results().count() >= 1);
    }
}
