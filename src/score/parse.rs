//! Parses a score CSV file into a [`Score`] (§4.8, §6 "Score CSV file";
//! grounded on `cwSfScoreParser.cpp`).

use std::collections::HashMap;
use std::io::Read;

use crate::error::{Error, Result};

use super::model::{Event, Location, Opcode, PerfState, Score, Section, Set, SetKind};

#[derive(Debug, serde::Deserialize)]
struct Row {
    opcode: String,
    bar: u32,
    sec: f64,
    d0: i64,
    #[serde(default)]
    section: String,
    #[serde(default, rename = "dyn")]
    dyn_col: String,
    #[serde(default)]
    even: String,
    #[serde(default)]
    tempo: String,
}

/// Parses score CSV text (the `opcode,...,bar,...,sec,...,d0,...,section,
/// ...,dyn,even,tempo` columns of §6) into a [`Score`].
///
/// Only the columns the core consumes are modelled; the remaining CSV
/// columns (`meas, index, voice, loc, eloc, oloc, tick, dur, rval, dots,
/// sci_pitch, dmark, dlevel, status, d1, bpm, grace, tie, onset, pedal`) are
/// accepted in the header but not otherwise interpreted here.
pub fn parse_score_csv<R: Read>(reader: R) -> Result<Score> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| Error::SyntaxError { context: "score csv header".into(), message: e.to_string() })?
        .clone();
    for required in ["opcode", "bar", "sec", "d0", "section", "dyn", "even", "tempo"] {
        if !headers.iter().any(|h| h == required) {
            return Err(Error::SyntaxError {
                context: "score csv header".into(),
                message: format!("missing required column '{required}'"),
            });
        }
    }

    let mut events = Vec::new();
    let mut bar_pitch_counts: HashMap<u32, u32> = HashMap::new();
    let mut open_sets: HashMap<SetKind, usize> = HashMap::new();
    let mut sets: Vec<Set> = Vec::new();
    let mut set_of_each_event: Vec<HashMap<SetKind, usize>> = Vec::new();

    for (row_no, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| Error::SyntaxError {
            context: format!("score csv row {row_no}"),
            message: e.to_string(),
        })?;
        let row: Row = record
            .deserialize(Some(&headers))
            .map_err(|e| Error::SyntaxError { context: format!("score csv row {row_no}"), message: e.to_string() })?;

        let op = Opcode::from_label(&row.opcode)?;
        let pitch = row.d0.clamp(0, 127) as u8;
        let bar_pitch_index = if op == Opcode::NoteOn {
            let slot = bar_pitch_counts.entry(row.bar).or_insert(0);
            let idx = *slot;
            *slot += 1;
            idx
        } else {
            0
        };

        let index = events.len();
        let mut event_set_of = HashMap::new();
        for (kind, cell) in [(SetKind::Dyn, &row.dyn_col), (SetKind::Even, &row.even), (SetKind::Tempo, &row.tempo)] {
            if let Some(tok) = cell.split_whitespace().next() {
                let mut chars = tok.chars();
                if let Some(c) = chars.next() {
                    if let Some((parsed_kind, is_end)) = SetKind::from_char(c) {
                        if parsed_kind != kind {
                            continue;
                        }
                        let set_idx = match open_sets.get(&kind) {
                            Some(&idx) => idx,
                            None => {
                                sets.push(Set { kind, event_indices: Vec::new(), target_section: None });
                                let idx = sets.len() - 1;
                                open_sets.insert(kind, idx);
                                idx
                            }
                        };
                        sets[set_idx].event_indices.push(index);
                        event_set_of.insert(kind, set_idx);
                        if is_end {
                            let section_label = if !row.section.is_empty() { Some(row.section.clone()) } else { None };
                            sets[set_idx].target_section = section_label;
                            open_sets.remove(&kind);
                        }
                    }
                }
            }
        }
        set_of_each_event.push(event_set_of);

        events.push(Event {
            index,
            csv_row: row_no + 1,
            op,
            bar: row.bar,
            pitch,
            vel: 0,
            bar_pitch_index,
            sec: row.sec,
            loc_id: 0,
            set_of: HashMap::new(),
            section_idx: 0,
            perf: PerfState::default(),
        });
    }

    // propagate target_section backward through sets of the same kind that
    // never named one explicitly, per §4.8.
    for kind in [SetKind::Dyn, SetKind::Even, SetKind::Tempo] {
        let mut last_named: Option<String> = None;
        for i in (0..sets.len()).rev() {
            if sets[i].kind != kind {
                continue;
            }
            if sets[i].target_section.is_some() {
                last_named = sets[i].target_section.clone();
            } else {
                sets[i].target_section = last_named.clone();
            }
        }
    }

    for (i, set_of) in set_of_each_event.into_iter().enumerate() {
        events[i].set_of = set_of;
    }

    // coalesce locations by equal score seconds, in encounter order.
    let mut locations: Vec<Location> = Vec::new();
    for e in &mut events {
        match locations.last_mut() {
            Some(loc) if (loc.sec - e.sec).abs() < f64::EPSILON => {
                loc.event_indices.push(e.index);
                e.loc_id = loc.loc_id;
            }
            _ => {
                let loc_id = locations.len();
                locations.push(Location { loc_id, sec: e.sec, event_indices: vec![e.index] });
                e.loc_id = loc_id;
            }
        }
    }

    // sections: derive from set target_section boundaries; fall back to a
    // single section spanning the whole score when none were named.
    let mut sections: Vec<Section> = Vec::new();
    {
        let mut label_to_events: HashMap<String, Vec<usize>> = HashMap::new();
        for set in &sets {
            if let Some(label) = &set.target_section {
                label_to_events.entry(label.clone()).or_default().extend(set.event_indices.iter().copied());
            }
        }
        if label_to_events.is_empty() {
            if !events.is_empty() {
                sections.push(Section { label: "default".into(), beg_event: 0, end_event: events.len() - 1 });
            }
        } else {
            let mut labels: Vec<String> = label_to_events.keys().cloned().collect();
            labels.sort();
            for label in labels {
                let idxs = &label_to_events[&label];
                let beg = *idxs.iter().min().unwrap();
                let end = *idxs.iter().max().unwrap();
                sections.push(Section { label, beg_event: beg, end_event: end });
            }
            for w in sections.windows(2) {
                if w[0].end_event + 1 != w[1].beg_event {
                    return Err(Error::SyntaxError {
                        context: "score sections".into(),
                        message: format!("gap between sections '{}' and '{}'", w[0].label, w[1].label),
                    });
                }
            }
        }
    }
    for e in &mut events {
        if let Some(pos) = sections.iter().position(|s| s.beg_event <= e.index && e.index <= s.end_event) {
            e.section_idx = pos;
        }
    }

    for set in &sets {
        let loc_n = set.event_indices.iter().map(|&i| events[i].loc_id).collect::<std::collections::HashSet<_>>().len();
        if loc_n < set.kind.min_loc_count() {
            return Err(Error::SyntaxError {
                context: format!("score set kind {:?}", set.kind),
                message: format!("set spans {loc_n} locations, need >= {}", set.kind.min_loc_count()),
            });
        }
    }

    Ok(Score::new(events, locations, sets, sections))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "opcode,bar,sec,d0,section,dyn,even,tempo\n";

    #[test]
    fn parses_minimal_score_into_one_default_section() {
        let csv = format!("{HEADER}non,1,0.0,60,,,,\nnon,1,0.5,64,,,,\n");
        let score = parse_score_csv(csv.as_bytes()).unwrap();
        assert_eq!(score.events.len(), 2);
        assert_eq!(score.locations.len(), 2);
        assert_eq!(score.sections.len(), 1);
    }

    #[test]
    fn even_set_below_minimum_location_count_fails() {
        let csv = format!("{HEADER}non,1,0.0,60,A,e,,\nnon,1,0.5,62,A,E,,\n");
        assert!(parse_score_csv(csv.as_bytes()).is_err());
    }

    #[test]
    fn even_set_spanning_three_locations_succeeds() {
        let csv = format!(
            "{HEADER}non,1,0.0,60,A,e,,\nnon,1,0.5,62,A,e,,\nnon,1,1.0,64,A,E,,\n"
        );
        let score = parse_score_csv(csv.as_bytes()).unwrap();
        assert_eq!(score.sets.len(), 1);
    }
}
