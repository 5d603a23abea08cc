//! Confluence is a real-time audio/MIDI dataflow engine with an integrated
//! score follower.
//!
//! A processing network is described as a directed graph of **processors**
//! ([`proc`]) connected by typed **variable** ports ([`variable`]). The
//! engine instantiates the graph, runs it sample-accurately under a fixed
//! block size, and mediates MIDI, audio, and structured-record streams
//! between processors via the typed buffers in [`buffer`] and [`record`].
//!
//! Layered on top is a performance-tracking subsystem ([`score`]): given a
//! reference musical score, it matches an incoming live MIDI stream to
//! score locations in real time.
//!
//! The [`concurrency`] module holds the lock-free primitives ([`concurrency::spsc_ring`],
//! [`concurrency::mpsc_queue`]) and worker-pool flavours ([`concurrency::futex_pool`],
//! [`concurrency::condvar_pool`]) the runtime is built on.

pub mod error;

pub mod concurrency;

pub mod value;
pub mod record;
pub mod buffer;

pub mod variable;
pub mod proc;
pub mod network;

pub mod processors;

pub mod score;

pub mod fs_util;
pub mod config;
pub mod device;

pub use error::{Error, Result};
