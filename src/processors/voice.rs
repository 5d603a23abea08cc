//! `poly_voice_ctl` (§4.7), `midi_voice`/`piano_voice`, `voice_detector`
//! (§4.6).

use std::collections::HashMap;

use crate::buffer::{AudioBuf, ChMsg, MidiBuf};
use crate::error::Result;
use crate::proc::{ClassMembers, ProcCtx};

#[derive(Debug, Clone, Default)]
struct Voice {
    active: bool,
    noff: bool,
    early_stop: bool,
    pitch: Option<u8>,
    vel: u8,
    age: u32,
    out_msgs: Vec<ChMsg>,
    gate: bool,
    done_fl: bool,
}

/// The central voice allocator. Fixed-size voice pool, per-pitch note
/// counter and last-assigned voice, prune-threshold `T`.
pub struct PolyVoiceCtl {
    /// Incoming channel messages for the current cycle; `exec` drains these
    /// into `note_on`/`note_off`/`broadcast_control` before calling `update`.
    pub input: MidiBuf,
    voices: Vec<Voice>,
    pitch_counter: HashMap<u8, u32>,
    pitch_voice: HashMap<u8, usize>,
    prune_threshold: usize,
    sustain_down: bool,
    sostenuto_down: bool,
}

impl PolyVoiceCtl {
    pub fn new(voice_n: usize, prune_threshold: usize) -> Self {
        PolyVoiceCtl {
            input: MidiBuf::default(),
            voices: vec![Voice::default(); voice_n],
            pitch_counter: HashMap::new(),
            pitch_voice: HashMap::new(),
            prune_threshold,
            sustain_down: false,
            sostenuto_down: false,
        }
    }

    pub fn voice_n(&self) -> usize {
        self.voices.len()
    }

    pub fn voice_gate(&self, i: usize) -> bool {
        self.voices[i].gate
    }

    pub fn voice_pitch(&self, i: usize) -> Option<u8> {
        self.voices[i].pitch
    }

    pub fn voice_out_msgs(&self, i: usize) -> &[ChMsg] {
        &self.voices[i].out_msgs
    }

    fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn oldest_active(&self) -> Option<usize> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active)
            .max_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)
    }

    fn oldest_non_early_stopped_active(&self) -> Option<usize> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active && !v.early_stop)
            .max_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)
    }

    fn first_inactive(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.active)
    }

    fn synth_note_off(&mut self, voice_idx: usize, pitch: u8, vel: u8) {
        self.voices[voice_idx].out_msgs.push(ChMsg {
            sample_idx: 0,
            uid: 0,
            status: ChMsg::NOTE_OFF,
            ch: 0,
            d0: pitch,
            d1: vel,
        });
    }

    /// Step 1-3 of the note-on contract (§4.7).
    pub fn note_on(&mut self, pitch: u8, vel: u8) {
        let counter = self.pitch_counter.entry(pitch).or_insert(0);
        *counter += 1;
        if let Some(&existing) = self.pitch_voice.get(&pitch) {
            if !self.voices[existing].early_stop {
                self.voices[existing].early_stop = true;
                self.synth_note_off(existing, pitch, 64);
            }
        }

        let chosen = self.first_inactive().or_else(|| self.oldest_active());
        let Some(idx) = chosen else { return };

        if !self.voices[idx].active {
            // was inactive, becoming active
        } else if let Some(stolen_pitch) = self.voices[idx].pitch {
            self.pitch_voice.remove(&stolen_pitch);
        }

        self.voices[idx] = Voice {
            active: true,
            noff: false,
            early_stop: false,
            pitch: Some(pitch),
            vel,
            age: 0,
            out_msgs: vec![ChMsg { sample_idx: 0, uid: 0, status: ChMsg::NOTE_ON, ch: 0, d0: pitch, d1: vel }],
            gate: true,
            done_fl: false,
        };
        self.pitch_voice.insert(pitch, idx);

        if self.active_count() > self.prune_threshold {
            if let Some(oldest) = self.oldest_non_early_stopped_active() {
                if oldest != idx {
                    let p = self.voices[oldest].pitch.unwrap_or(pitch);
                    self.voices[oldest].early_stop = true;
                    self.synth_note_off(oldest, p, 64);
                }
            }
        }
    }

    /// The note-off contract (§4.7), including the stolen-voice subtlety:
    /// only a voice that still owns the pitch is turned off.
    pub fn note_off(&mut self, pitch: u8) {
        let counter = match self.pitch_counter.get_mut(&pitch) {
            Some(c) if *c > 0 => c,
            _ => {
                tracing::warn!(pitch, "note-off with zero pending counter, ignored");
                return;
            }
        };
        *counter -= 1;
        if *counter != 0 {
            return;
        }
        if let Some(&idx) = self.pitch_voice.get(&pitch) {
            let v = &mut self.voices[idx];
            if v.active && !v.noff && !v.early_stop && v.pitch == Some(pitch) {
                v.noff = true;
                v.out_msgs.push(ChMsg { sample_idx: 0, uid: 0, status: ChMsg::NOTE_OFF, ch: 0, d0: pitch, d1: 64 });
            }
        }
    }

    /// Non-channel messages (control changes, …) broadcast to all voices;
    /// sustain/sostenuto transitions are tracked for diagnostics only.
    pub fn broadcast_control(&mut self, msg: ChMsg) {
        if msg.d0 == ChMsg::CTL_SUSTAIN {
            self.sustain_down = msg.d1 >= 64;
        } else if msg.d0 == ChMsg::CTL_SOSTENUTO {
            self.sostenuto_down = msg.d1 >= 64;
        }
        for v in &mut self.voices {
            if v.active {
                v.out_msgs.push(msg);
            }
        }
    }

    pub fn signal_done(&mut self, voice_idx: usize) {
        self.voices[voice_idx].done_fl = true;
    }

    /// Per-cycle update: reset completed voices and clear their gate, age
    /// active voices, clear outgoing message slices.
    pub fn update(&mut self) {
        for i in 0..self.voices.len() {
            if self.voices[i].done_fl {
                let pitch = self.voices[i].pitch;
                if let Some(p) = pitch {
                    let counter_zero = self.pitch_counter.get(&p).copied().unwrap_or(0) == 0;
                    let still_owns = self.pitch_voice.get(&p).copied() == Some(i);
                    if counter_zero && still_owns {
                        self.pitch_voice.remove(&p);
                    }
                }
                self.voices[i] = Voice::default();
            } else if self.voices[i].active {
                self.voices[i].age += 1;
            }
            self.voices[i].out_msgs.clear();
        }
    }
}

impl ClassMembers for PolyVoiceCtl {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    /// Drains `self.input` for the cycle, dispatching each message to the
    /// note-on/note-off/control contract (§4.7), then ages and resets the
    /// voice pool for the next cycle.
    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        for msg in self.input.msgs().to_vec() {
            if msg.is_note_on() {
                self.note_on(msg.pitch(), msg.velocity());
            } else if msg.is_note_off() {
                self.note_off(msg.pitch());
            } else {
                self.broadcast_control(msg);
            }
        }
        self.update();
        Ok(())
    }
}

/// Per-voice RMS-window with hysteresis; emits a done-flag after three
/// consecutive sub-threshold windows following at least one above-
/// threshold window.
pub struct VoiceDetector {
    pub input: AudioBuf,
    threshold: f32,
    window_n: usize,
    went_above: bool,
    below_run: u32,
    pub done_fl: bool,
}

impl VoiceDetector {
    pub fn new(ch_n: usize, frame_n: usize, srate: f64, threshold: f32) -> Self {
        VoiceDetector {
            input: AudioBuf::new(ch_n, frame_n, srate),
            threshold,
            window_n: frame_n,
            went_above: false,
            below_run: 0,
            done_fl: false,
        }
    }
}

impl ClassMembers for VoiceDetector {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let rms = (self.input.channel(0).iter().map(|s| s * s).sum::<f32>() / self.window_n.max(1) as f32).sqrt();
        if rms >= self.threshold {
            self.went_above = true;
            self.below_run = 0;
            self.done_fl = false;
        } else if self.went_above {
            self.below_run += 1;
            if self.below_run >= 3 {
                self.done_fl = true;
            }
        }
        Ok(())
    }
}

/// A piano-voice synthesizer: a multi-channel wave-table-sequence
/// oscillator plus sustain/sostenuto pedal state. The wave-table bank
/// itself is shared, read-only context (§9 "Global state"), not owned
/// here.
pub struct PianoVoice {
    pub output: AudioBuf,
    wave_table: std::sync::Arc<Vec<f32>>,
    phase: f64,
    freq_hz: f64,
    sustain: bool,
    sostenuto: bool,
    /// Test-mode remap: an input pitch range collapses to one sampled
    /// pitch with a fixed, ordered list of velocities.
    test_mode: Option<(std::ops::RangeInclusive<u8>, u8, Vec<u8>)>,
}

impl PianoVoice {
    pub fn new(wave_table: std::sync::Arc<Vec<f32>>, ch_n: usize, frame_n: usize, srate: f64) -> Self {
        PianoVoice {
            output: AudioBuf::new(ch_n, frame_n, srate),
            wave_table,
            phase: 0.0,
            freq_hz: 0.0,
            sustain: false,
            sostenuto: false,
            test_mode: None,
        }
    }

    pub fn note_on(&mut self, pitch: u8) {
        self.freq_hz = 440.0 * 2f64.powf((pitch as f64 - 69.0) / 12.0);
        self.phase = 0.0;
    }

    pub fn set_test_mode(&mut self, range: std::ops::RangeInclusive<u8>, sampled_pitch: u8, velocities: Vec<u8>) {
        self.test_mode = Some((range, sampled_pitch, velocities));
    }

    pub fn set_pedal(&mut self, sustain: bool, sostenuto: bool) {
        self.sustain = sustain;
        self.sostenuto = sostenuto;
    }
}

impl ClassMembers for PianoVoice {
    fn create(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, _ctx: &mut ProcCtx) -> Result<()> {
        let n = self.wave_table.len();
        if n == 0 {
            self.output.zero();
            return Ok(());
        }
        let step = self.freq_hz / self.output.srate * n as f64;
        let frame_n = self.output.frame_n;
        for c in 0..self.output.ch_n {
            let out = self.output.channel_mut(c);
            let mut ph = self.phase;
            for s in out.iter_mut().take(frame_n) {
                let idx = (ph as usize) % n;
                *s = self.wave_table[idx];
                ph += step;
            }
        }
        self.phase = (self.phase + step * frame_n as f64) % n as f64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 4: reattack forces the prior voice off before reassigning.
    #[test]
    fn reattack_early_stops_prior_voice_then_allocates_new_one() {
        let mut ctl = PolyVoiceCtl::new(4, 4);
        ctl.note_on(60, 100);
        let voice_a = ctl.pitch_voice[&60];
        assert!(ctl.voice_out_msgs(voice_a).iter().any(|m| m.is_note_on()));
        ctl.update();

        ctl.note_on(60, 100);
        // voice A got an early-stop note-off queued before reassignment.
        assert!(ctl.voice_out_msgs(voice_a).iter().any(|m| m.is_note_off()));
        let voice_b = ctl.pitch_voice[&60];
        assert_ne!(voice_a, voice_b);
        ctl.update();

        ctl.note_off(60);
        // first off consumed by the counter decrement (2 -> 1); no message yet.
        assert!(ctl.voice_out_msgs(voice_b).is_empty());
        ctl.note_off(60);
        // second off reaches voice B.
        assert!(ctl.voice_out_msgs(voice_b).iter().any(|m| m.is_note_off()));
    }

    #[test]
    fn every_note_on_and_its_matching_off_land_on_the_same_voice() {
        let mut ctl = PolyVoiceCtl::new(4, 4);
        let pitches = [60u8, 62, 64, 65];
        let mut assigned = Vec::new();
        for &p in &pitches {
            ctl.note_on(p, 100);
            assigned.push(ctl.pitch_voice[&p]);
            ctl.update();
        }
        assert_eq!(assigned.iter().collect::<std::collections::HashSet<_>>().len(), 4);
        for (i, &p) in pitches.iter().enumerate() {
            ctl.note_off(p);
            assert!(ctl.voice_out_msgs(assigned[i]).iter().any(|m| m.is_note_off() && m.pitch() == p));
            ctl.update();
        }
    }

    #[test]
    fn poly_voice_ctl_execs_note_on_from_its_input_mbuf() {
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        let mut ctl = PolyVoiceCtl::new(4, 4);
        ctl.create(&mut ctx).unwrap();
        ctl.input = crate::buffer::MidiBuf::new(vec![crate::buffer::ChMsg {
            sample_idx: 0,
            uid: 0,
            status: crate::buffer::ChMsg::NOTE_ON,
            ch: 0,
            d0: 60,
            d1: 100,
        }]);
        ctl.exec(&mut ctx).unwrap();
        let voice = ctl.pitch_voice[&60];
        assert!(ctl.voice_gate(voice));
    }

    #[test]
    fn voice_detector_needs_three_consecutive_quiet_windows_after_a_loud_one() {
        let mut vars = crate::variable::VariableRegistry::new();
        let mut ctx = ProcCtx { id: crate::proc::ProcId(0), label: "t", sfx_id: 0, cycle_idx: 0, vars: &mut vars };
        let mut vd = VoiceDetector::new(1, 16, 48_000.0, 0.1);
        vd.create(&mut ctx).unwrap();
        vd.input.channel_mut(0).fill(1.0);
        vd.exec(&mut ctx).unwrap();
        assert!(!vd.done_fl);
        vd.input.channel_mut(0).fill(0.0);
        vd.exec(&mut ctx).unwrap();
        assert!(!vd.done_fl);
        vd.exec(&mut ctx).unwrap();
        assert!(!vd.done_fl);
        vd.exec(&mut ctx).unwrap();
        assert!(vd.done_fl);
    }
}
