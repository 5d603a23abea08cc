//! The processor library: ~40 processor classes over the proc/variable
//! runtime (§4.6).

pub mod audio_io;
pub mod audio_dsp;
pub mod sine_tone;
pub mod spectral;
pub mod dynamics;
pub mod midi_io;
pub mod midi_util;
pub mod voice;
pub mod xfade_ctl;
pub mod poly;
pub mod glue;

pub use audio_dsp::{AudioDelay, AudioDuplicate, AudioGain, AudioMerge, AudioMix, AudioSplit};
pub use audio_io::{AudioFileIn, AudioFileOut, WavFileSink, WavFileSource};
pub use dynamics::{AudioMeter, Compressor, DcFilter, Limiter};
pub use midi_io::{MidiFile, MidiIn, MidiOut};
pub use midi_util::{MidiMerge, MidiMsg, MidiSplit, RecdMerge, RecdRoute};
pub use sine_tone::SineTone;
pub use spectral::{PvAnalysis, PvSynthesis, SpecDist};
pub use voice::{PianoVoice, PolyVoiceCtl, VoiceDetector};
pub use xfade_ctl::XfadeCtl;
pub use poly::Poly;
pub use glue::{
    Add, Counter, GutimPsMsgTable, GutimTakeMenu, Halt, LabelValueList, Number, OnStart, Preset as PresetGlue,
    Print, Register, ScorePlayerCtl, StringList, Timer, ValueList,
};
