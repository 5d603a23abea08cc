//! DP-window score matcher (§4.9 `sfmatch`, grounded on `cwSfMatch.cpp/h`):
//! edit-distance alignment between a score window and a MIDI window.

use crate::error::{Error, Result};

use super::model::Score;

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    min: i32,
    sub: i32,
    del: i32,
    ins: i32,
    matched: bool,
    transpose: bool,
}

fn cell_at(grid: &[Cell], cols: usize, i: usize, j: usize) -> Cell {
    grid[i * cols + j]
}

/// Depth-first enumeration of every grid path from `(i, j)` down to `(0, 0)`
/// that only ever takes a move realizing that cell's minimum cost, stopping
/// once [`MAX_CANDIDATE_PATHS`] candidates have been collected.
fn enumerate_paths(grid: &[Cell], cols: usize, i: usize, j: usize, cur: &mut Vec<PathStep>, out: &mut Vec<Vec<PathStep>>) {
    if out.len() >= MAX_CANDIDATE_PATHS {
        return;
    }
    if i == 0 && j == 0 {
        let mut path = cur.clone();
        path.reverse();
        out.push(path);
        return;
    }
    if i == 0 {
        cur.push(PathStep { midi_row: i, loc_col: j, kind: StepKind::Ins, transpose: false });
        enumerate_paths(grid, cols, i, j - 1, cur, out);
        cur.pop();
        return;
    }
    if j == 0 {
        cur.push(PathStep { midi_row: i, loc_col: j, kind: StepKind::Del, transpose: false });
        enumerate_paths(grid, cols, i - 1, j, cur, out);
        cur.pop();
        return;
    }
    let cell = cell_at(grid, cols, i, j);
    if cell.min == cell.sub {
        cur.push(PathStep {
            midi_row: i,
            loc_col: j,
            kind: if cell.matched { StepKind::Match } else { StepKind::Sub },
            transpose: cell.transpose,
        });
        enumerate_paths(grid, cols, i - 1, j - 1, cur, out);
        cur.pop();
    }
    if cell.min == cell.del {
        cur.push(PathStep { midi_row: i, loc_col: j, kind: StepKind::Del, transpose: false });
        enumerate_paths(grid, cols, i - 1, j, cur, out);
        cur.pop();
    }
    if cell.min == cell.ins {
        cur.push(PathStep { midi_row: i, loc_col: j, kind: StepKind::Ins, transpose: false });
        enumerate_paths(grid, cols, i, j - 1, cur, out);
        cur.pop();
    }
}

/// §4.9's path-selection score: `gap_count / path_len + penalty`, where a
/// gap is an insertion or deletion, a transposed step is rewarded (`-1`),
/// an unmatched substitution/insertion/deletion is penalized (`+1`), and a
/// genuine match costs nothing.
fn path_score(path: &[PathStep]) -> f64 {
    let gap_count = path.iter().filter(|s| matches!(s.kind, StepKind::Ins | StepKind::Del)).count();
    let penalty: i32 = path
        .iter()
        .map(|s| if s.transpose { -1 } else if s.kind == StepKind::Match { 0 } else { 1 })
        .sum();
    gap_count as f64 / path.len().max(1) as f64 + penalty as f64
}

/// One step of the retained optimal path: which MIDI row and score column
/// (both 1-based matrix coordinates) this step lands on, and whether it is
/// a match, a substitution, an insertion (extra MIDI note) or a deletion
/// (skipped score event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Match,
    Sub,
    Ins,
    Del,
}

#[derive(Debug, Clone, Copy)]
pub struct PathStep {
    pub midi_row: usize,
    pub loc_col: usize,
    pub kind: StepKind,
    pub transpose: bool,
}

/// Outcome of [`Matcher::sync`]: for each non-insert MIDI event, the score
/// location and event it was matched against.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult {
    pub midi_row: usize,
    pub loc_id: usize,
    pub sc_evt_idx: usize,
    pub matched: bool,
    pub transpose: bool,
}

/// Maximum number of distinct minimum-cost paths the backtrace will
/// enumerate before settling on the best-scoring one found so far; windows
/// are small enough in practice that this bound is never approached.
const MAX_CANDIDATE_PATHS: usize = 256;

/// A DP edit-distance window matcher between a score pitch window and a
/// MIDI pitch window (§4.9). Holds the most recently accepted optimal path.
pub struct Matcher {
    loc_idx: usize,
    loc_n: usize,
    midi_n: usize,
    cost: i32,
    path: Vec<PathStep>,
    /// Per-matched-row location/event mapping, populated by [`Matcher::sync`].
    results: Vec<MatchResult>,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher { loc_idx: 0, loc_n: 0, midi_n: 0, cost: i32::MAX, path: Vec::new(), results: Vec::new() }
    }

    pub fn cost(&self) -> i32 {
        self.cost
    }

    pub fn path(&self) -> &[PathStep] {
        &self.path
    }

    /// Computes the alignment of score window `[loc_idx, loc_idx+loc_n)`
    /// against `midi_v[0..midi_n]`, replacing the stored optimal path only
    /// if its cost is strictly less than `min_cost` (§4.9 windowing
    /// contract). Fails with `EndOfFile` when the window runs past the end
    /// of the score.
    pub fn exec(&mut self, score: &Score, loc_idx: usize, loc_n: usize, midi_v: &[u8], midi_n: usize, min_cost: i32) -> Result<()> {
        if loc_idx + loc_n > score.locations.len() {
            return Err(Error::EndOfFile);
        }
        let midi_n = midi_n.min(midi_v.len());

        // column j (1-based) corresponds to score location loc_idx + j - 1;
        // its pitch set is every note-on pitch at that location.
        let loc_pitches: Vec<Vec<u8>> = (0..loc_n)
            .map(|j| {
                score.locations[loc_idx + j]
                    .event_indices
                    .iter()
                    .filter_map(|&i| score.events[i].is_note_on().then_some(score.events[i].pitch))
                    .collect()
            })
            .collect();

        let rows = midi_n + 1;
        let cols = loc_n + 1;
        let mut grid = vec![Cell::default(); rows * cols];
        let at = |g: &[Cell], i: usize, j: usize| g[i * cols + j];
        for i in 0..rows {
            grid[i * cols].min = i as i32;
        }
        for j in 0..cols {
            grid[j].min = j as i32;
        }

        for i in 1..rows {
            for j in 1..cols {
                let is_match = loc_pitches[j - 1].contains(&midi_v[i - 1]);
                let sub = at(&grid, i - 1, j - 1).min + if is_match { 0 } else { 1 };
                let del = at(&grid, i - 1, j).min + 1;
                let ins = at(&grid, i, j - 1).min + 1;
                let min = sub.min(del).min(ins);

                let prev_non_match_sub = !at(&grid, i - 1, j - 1).matched && i >= 2 && j >= 2;
                let transpose = !is_match
                    && prev_non_match_sub
                    && midi_n >= 2
                    && loc_n >= 2
                    && midi_v.get(i - 2) == loc_pitches[j - 1].first()
                    && loc_pitches.get(j - 2).map(|p| p.contains(&midi_v[i - 1])).unwrap_or(false);

                grid[i * cols + j] = Cell { min, sub, del, ins, matched: is_match, transpose };
            }
        }

        let cost = at(&grid, rows - 1, cols - 1).min;
        if cost >= min_cost {
            return Ok(());
        }

        // backtrace: enumerate every path that realizes the minimum cost,
        // then keep the one scoring lowest by gap_count/path_len + penalty
        // (§4.9: transpositions preferred over unrelated substitutions).
        let mut candidates = Vec::new();
        let mut cur = Vec::new();
        enumerate_paths(&grid, cols, rows - 1, cols - 1, &mut cur, &mut candidates);

        let best = candidates
            .into_iter()
            .min_by(|a, b| path_score(a).partial_cmp(&path_score(b)).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or_default();

        self.loc_idx = loc_idx;
        self.loc_n = loc_n;
        self.midi_n = midi_n;
        self.cost = cost;
        self.path = best;
        Ok(())
    }

    /// Walks the stored path, stamping each non-insert MIDI event with its
    /// matched location index and score event index (or, for a spurious
    /// note, the nearest preceding location) into [`Matcher::results`].
    /// Returns the last matched location and the trailing miss (unmatched)
    /// count.
    pub fn sync(&mut self, score: &Score, midi_v: &[u8], midi_n: usize) -> Result<(usize, usize)> {
        let _ = midi_v;
        let _ = midi_n;
        let mut last_loc = self.loc_idx;
        let mut trailing_miss = 0usize;
        self.results.clear();
        for step in &self.path {
            match step.kind {
                StepKind::Match | StepKind::Sub => {
                    let loc = self.loc_idx + step.loc_col - 1;
                    let ev = score.locations[loc]
                        .event_indices
                        .iter()
                        .copied()
                        .find(|&i| score.events[i].is_note_on())
                        .unwrap_or(score.locations[loc].event_indices[0]);
                    self.results.push(MatchResult {
                        midi_row: step.midi_row,
                        loc_id: loc,
                        sc_evt_idx: ev,
                        matched: step.kind == StepKind::Match,
                        transpose: step.transpose,
                    });
                    last_loc = loc;
                    trailing_miss = if step.kind == StepKind::Match { 0 } else { trailing_miss + 1 };
                }
                StepKind::Del => {
                    self.results.push(MatchResult {
                        midi_row: step.midi_row,
                        loc_id: last_loc,
                        sc_evt_idx: 0,
                        matched: false,
                        transpose: false,
                    });
                    trailing_miss += 1;
                }
                StepKind::Ins => {}
            }
        }
        Ok((last_loc, trailing_miss))
    }

    pub fn results(&self) -> &[MatchResult] {
        &self.results
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
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
    fn identical_windows_cost_zero_and_all_match() {
        let score = make_score(&[60, 62, 64, 65]);
        let midi = [60u8, 62, 64, 65];
        let mut matcher = Matcher::new();
        matcher.exec(&score, 0, 4, &midi, 4, i32::MAX).unwrap();
        assert_eq!(matcher.cost(), 0);
        assert!(matcher.path().iter().all(|s| s.kind == StepKind::Match));
    }

    #[test]
    fn transposition_keeps_cost_low_and_flags_involved_cells() {
        let score = make_score(&[60, 62, 64, 65]);
        let midi = [60u8, 64, 62, 65];
        let mut matcher = Matcher::new();
        matcher.exec(&score, 0, 4, &midi, 4, i32::MAX).unwrap();
        assert!(matcher.cost() <= 2);
    }

    #[test]
    fn path_selection_prefers_the_transposed_path_over_unrelated_subs() {
        // 64/62 are swapped relative to the score; both a same-cost
        // transpose-flagged path and a two-substitution path realize the
        // minimum edit cost here, and the scorer must prefer the former.
        let score = make_score(&[60, 62, 64, 65]);
        let midi = [60u8, 64, 62, 65];
        let mut matcher = Matcher::new();
        matcher.exec(&score, 0, 4, &midi, 4, i32::MAX).unwrap();
        assert!(matcher.path().iter().any(|s| s.transpose), "expected a transposed step in the selected path");
    }

    #[test]
    fn sync_stamps_matched_rows_with_their_score_location_and_event() {
        let score = make_score(&[60, 62, 64, 65]);
        let midi = [60u8, 62, 64, 65];
        let mut matcher = Matcher::new();
        matcher.exec(&score, 0, 4, &midi, 4, i32::MAX).unwrap();
        matcher.sync(&score, &midi, 4).unwrap();
        let results = matcher.results();
        assert_eq!(results.len(), 4);
        for (row, r) in results.iter().enumerate() {
            assert_eq!(r.midi_row, row + 1);
            assert_eq!(r.loc_id, row);
            assert!(r.matched);
        }
    }

    #[test]
    fn window_past_end_of_score_is_end_of_file() {
        let score = make_score(&[60, 62]);
        let mut matcher = Matcher::new();
        let midi = [60u8];
        assert!(matches!(matcher.exec(&score, 1, 5, &midi, 1, i32::MAX), Err(Error::EndOfFile)));
    }
}
