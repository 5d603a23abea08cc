//! Lock-free cross-thread primitives (§4.1–§4.3).
//!
//! These are the leaves of the dependency order: everything else in the
//! crate is built on top of the ring, the queue, and the two task-pool
//! flavours defined here.

pub mod spsc_ring;
pub mod mpsc_queue;
pub mod futex_pool;
pub mod condvar_pool;
