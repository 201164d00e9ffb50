//! Reactive Machinery
//!
//! This module implements dependency tracking for context lookups: cached
//! value computations, trackers, and the invalidation runtime that connects
//! them to context mutations.
//!
//! # Concepts
//!
//! ## Reads
//!
//! Every lookup performed while a computation runs is recorded as a
//! [`Read`](read::Read): which context was asked, how, what was observed, and
//! which contexts the lookup passed through on its way to the root.
//!
//! ## Value computations
//!
//! A key bound to a value provider is computed lazily and cached per
//! originating context. The cache re-validates before it recomputes.
//!
//! ## Trackers
//!
//! A tracker is a side-effecting callback registered with `run_and_track`.
//! It re-runs synchronously, on the mutating thread, whenever something it
//! read resolves to a different value.
//!
//! # Implementation Notes
//!
//! The dependency frames are thread-local. When a context value is read, we
//! check if a frame is open and, if so, record the read into it.

mod effect;
mod memo;
pub(crate) mod read;
mod runtime;
mod subscriber;
mod tracking;

pub(crate) use effect::Tracker;
pub(crate) use memo::ValueComputation;
pub(crate) use read::{Key, Path, Probe, Read, Topic};
pub(crate) use runtime::{Batch, Change, Reactive};
pub use subscriber::SubscriberId;
pub(crate) use tracking::Tracking;
