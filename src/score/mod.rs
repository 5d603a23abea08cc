//! The score follower: a static score model (§4.8) matched against
//! incoming performance MIDI by a DP window matcher (§4.9), driven by
//! either a streaming tracker (§4.10) or the tempo-aware alternative
//! follower (§4.11).

pub mod model;
pub mod parse;
pub mod matcher;
pub mod track;
pub mod follow2;

pub use model::{Event, Location, Opcode, Score, Section, Set, SetKind};
pub use matcher::{Matcher, MatchResult};
pub use track::{Tracker, TrackEvent, TrackFlags};
pub use follow2::Follow2;
