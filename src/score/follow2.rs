//! Alternative, tempo-corrected follower (§4.11 `score_follow_2`, grounded
//! on `cwScoreFollow2.cpp`): tracks an expectation vector over score
//! locations rather than re-running the DP matcher per note.

use crate::score::model::Score;

/// Per-location precomputed search and affinity data.
#[derive(Debug, Clone)]
struct LocGeom {
    /// Note indices (into the flattened performance stream window) this
    /// location may plausibly match, expressed as a `[lo, hi)` time range.
    search_lo_sec: f64,
    search_hi_sec: f64,
    affinity_lo_sec: f64,
    affinity_hi_sec: f64,
}

/// Tuning thresholds for acceptance/rejection (§4.11 step 4).
#[derive(Debug, Clone, Copy)]
pub struct Follow2Config {
    pub pre_wnd_sec: f64,
    pub post_wnd_sec: f64,
    pub pre_affinity_sec: f64,
    pub post_affinity_sec: f64,
    pub lo_sec_thresh: f64,
    pub lo_loc_thresh: i64,
    pub hi_loc_thresh: i64,
    pub hi_sec_thresh: f64,
    pub d_loc_stats_thresh: i64,
    pub decay_coeff: f64,
    pub end_loc_id: usize,
}

impl Default for Follow2Config {
    fn default() -> Self {
        Follow2Config {
            pre_wnd_sec: 2.0,
            post_wnd_sec: 2.0,
            pre_affinity_sec: 1.0,
            post_affinity_sec: 1.0,
            lo_sec_thresh: 0.25,
            lo_loc_thresh: 1,
            hi_loc_thresh: 8,
            hi_sec_thresh: 1.0,
            d_loc_stats_thresh: 4,
            decay_coeff: 0.95,
            end_loc_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Spurious,
    Rejected,
}

/// The tempo-tracking alternative follower.
pub struct Follow2 {
    cfg: Follow2Config,
    geoms: Vec<LocGeom>,
    expectation: Vec<f64>,
    expected_loc: usize,
    tempo_factor: f64,
    beg_score_sec: f64,
    beg_perf_sec: f64,
    match_cnt: u32,
    note_quota: Vec<u32>,
    notes_seen: Vec<u32>,
    done: bool,
}

impl Follow2 {
    pub fn new(score: &Score, cfg: Follow2Config) -> Self {
        let min_locs = 3usize;
        let geoms: Vec<LocGeom> = score
            .locations
            .iter()
            .map(|loc| LocGeom {
                search_lo_sec: loc.sec - cfg.pre_wnd_sec,
                search_hi_sec: loc.sec + cfg.post_wnd_sec,
                affinity_lo_sec: loc.sec - cfg.pre_affinity_sec,
                affinity_hi_sec: loc.sec + cfg.post_affinity_sec,
            })
            .collect();
        let note_quota: Vec<u32> = score.locations.iter().map(|loc| loc.event_indices.len() as u32).collect();
        let _ = min_locs;
        Follow2 {
            expectation: vec![0.0; score.locations.len()],
            expected_loc: 0,
            tempo_factor: 1.0,
            beg_score_sec: score.locations.first().map(|l| l.sec).unwrap_or(0.0),
            beg_perf_sec: 0.0,
            match_cnt: 0,
            note_quota,
            notes_seen: vec![0; score.locations.len()],
            done: false,
            geoms,
            cfg,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn expected_loc(&self) -> usize {
        self.expected_loc
    }

    pub fn tempo_factor(&self) -> f64 {
        self.tempo_factor
    }

    /// Applies the triangular affinity envelope of `loc` to the
    /// expectation vector (§4.11).
    fn apply_affinity(&mut self, score: &Score, loc: usize) {
        let geom = &self.geoms[loc];
        let wnd_dur = self.cfg.pre_affinity_sec.max(self.cfg.post_affinity_sec).max(1e-9);
        for (i, other) in score.locations.iter().enumerate() {
            if other.sec < geom.affinity_lo_sec || other.sec > geom.affinity_hi_sec {
                continue;
            }
            let dt = (other.sec - score.locations[loc].sec).abs();
            let weight = ((wnd_dur - dt) / wnd_dur).max(0.0);
            self.expectation[i] += weight;
        }
    }

    fn advance_expected_loc(&mut self, score: &Score) {
        let mut loc = self.expected_loc;
        while loc < score.locations.len() && self.notes_seen[loc] >= self.note_quota[loc].max(1) {
            loc += 1;
        }
        self.expected_loc = loc.min(score.locations.len().saturating_sub(1));
        if loc >= score.locations.len() || loc == self.cfg.end_loc_id {
            self.done = true;
        } else {
            self.apply_affinity(score, self.expected_loc);
        }
    }

    /// Decays the expectation vector within the current search window by
    /// `decay_coeff`, for cycles without an input note (§4.11).
    pub fn decay(&mut self, score: &Score) {
        let geom = &self.geoms[self.expected_loc];
        for (i, loc) in score.locations.iter().enumerate() {
            if loc.sec >= geom.search_lo_sec && loc.sec <= geom.search_hi_sec {
                self.expectation[i] *= self.cfg.decay_coeff;
            }
        }
    }

    /// Processes one incoming performance note (§4.11 steps 1-5).
    pub fn note_on(&mut self, score: &Score, perf_sec: f64, pitch: u8) -> Outcome {
        if self.done {
            return Outcome::Spurious;
        }
        let geom = &self.geoms[self.expected_loc];
        let (lo_sec, hi_sec) = (geom.search_lo_sec, geom.search_hi_sec);

        let mut best: Option<(usize, f64)> = None;
        for (i, loc) in score.locations.iter().enumerate() {
            if loc.sec < lo_sec || loc.sec > hi_sec {
                continue;
            }
            let has_pitch = loc.event_indices.iter().any(|&e| score.events[e].is_note_on() && score.events[e].pitch == pitch);
            if !has_pitch {
                continue;
            }
            let exp = self.expectation[i];
            if best.map(|(_, e)| exp > e).unwrap_or(true) {
                best = Some((i, exp));
            }
        }

        let Some((candidate, _)) = best else {
            return Outcome::Spurious;
        };

        let delta_loc = candidate as i64 - self.expected_loc as i64;
        let delta_score_sec = score.locations[candidate].sec - score.locations[self.expected_loc].sec;
        let delta_perf_sec = perf_sec - self.beg_perf_sec;
        let delta_corr = delta_perf_sec - delta_score_sec / self.tempo_factor.max(1e-6);

        let reject = (delta_corr.abs() > self.cfg.lo_sec_thresh && delta_loc.abs() > self.cfg.lo_loc_thresh)
            || delta_loc.abs() > self.cfg.hi_loc_thresh
            || (delta_loc > 0 && delta_corr.abs() > self.cfg.hi_sec_thresh);
        if reject {
            return Outcome::Rejected;
        }

        self.match_cnt += 1;
        self.notes_seen[candidate] += 1;
        if delta_loc >= 0 && delta_loc < self.cfg.d_loc_stats_thresh {
            let score_elapsed = score.locations[candidate].sec - self.beg_score_sec;
            let perf_elapsed = (perf_sec - self.beg_perf_sec).max(1e-6);
            self.tempo_factor = score_elapsed / perf_elapsed;
        }
        if candidate == self.expected_loc {
            self.advance_expected_loc(score);
        }
        Outcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::model::{Event, Location, Opcode, PerfState, Section};
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
                sec: i as f64 * 0.5,
                loc_id: i,
                set_of: HashMap::new(),
                section_idx: 0,
                perf: PerfState::default(),
            })
            .collect();
        let locations: Vec<Location> = (0..pitches.len()).map(|i| Location { loc_id: i, sec: i as f64 * 0.5, event_indices: vec![i] }).collect();
        let sections = vec![Section { label: "A".into(), beg_event: 0, end_event: pitches.len() - 1 }];
        Score::new(events, locations, Vec::new(), sections)
    }

    #[test]
    fn matching_pitch_in_window_is_accepted_and_advances_expectation() {
        let score = make_score(&[60, 62, 64, 65]);
        let mut f = Follow2::new(&score, Follow2Config::default());
        assert_eq!(f.note_on(&score, 0.0, 60), Outcome::Accepted);
        assert_eq!(f.expected_loc(), 1);
    }

    #[test]
    fn no_matching_pitch_in_window_is_spurious() {
        let score = make_score(&[60, 62, 64, 65]);
        let mut f = Follow2::new(&score, Follow2Config::default());
        assert_eq!(f.note_on(&score, 0.0, 127), Outcome::Spurious);
    }
}
