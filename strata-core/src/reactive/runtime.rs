//! Invalidation Runtime
//!
//! Connects context mutations to the computations that depend on them.
//!
//! # How It Works
//!
//! Updates are push-pull:
//!
//! 1. A mutation opens a [`Batch`] and pushes a change notification for one
//!    topic of one context.
//!
//! 2. Every listener registered there is marked "maybe dirty". Value
//!    computations pass the mark on to whoever read *them*; trackers are
//!    queued. Each subscriber is visited at most once per batch, so a
//!    computation reachable over several edges is only notified once.
//!
//! 3. When the batch runs, each queued tracker re-validates its reads: the
//!    recorded probes are resolved again and compared with what was
//!    observed. Cached values are pulled (and recomputed) on demand during
//!    this step. Only a tracker with a read that really changed re-runs.
//!
//! Listener registries hold subscribers weakly. A context never keeps a
//! computation alive; the owners do (see `memo` and `effect`).

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use tracing::warn;

use super::read::{same_path, Path, Read, Topic};
use super::SubscriberId;
use crate::context::{resolve, ContextInner};
use crate::error::Result;

/// What kind of change is being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    /// The slot of a context was written, removed or disposed.
    Slot,
    /// The parent of a context was replaced.
    Parent,
    /// A value computation the listener read through may have changed.
    Derived,
}

/// A subscriber to context changes.
pub(crate) trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// React to a change of `topic` on `source`.
    ///
    /// Implementations mark themselves and either forward the notification
    /// through `batch` or queue themselves with [`Batch::schedule`].
    fn mark_maybe_dirty(
        &self,
        source: &ContextInner,
        topic: &Topic,
        change: Change,
        batch: &mut Batch,
    );

    /// Bring this subscriber up to date (trackers only).
    fn schedule(&self) -> Result<()>;

    /// Check if this reactive value is a tracker (eager) or a cached value (lazy).
    fn is_eager(&self) -> bool;
}

/// One pass of change propagation.
#[derive(Default)]
pub(crate) struct Batch {
    visited: HashSet<SubscriberId>,
    scheduled: IndexMap<SubscriberId, Arc<dyn Reactive>>,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Notify every listener of `topic` on `source`.
    pub(crate) fn propagate(&mut self, source: &ContextInner, topic: &Topic, change: Change) {
        let Some(listeners) = source.listeners_for(topic) else {
            return;
        };
        for reactive in listeners.iter() {
            reactive.mark_maybe_dirty(source, topic, change, self);
        }
    }

    /// Record a visit; `false` if the subscriber was already reached.
    pub(crate) fn first_visit(&mut self, id: SubscriberId) -> bool {
        self.visited.insert(id)
    }

    /// Queue an eager subscriber. Queued once per batch, in arrival order.
    pub(crate) fn schedule(&mut self, reactive: Arc<dyn Reactive>) {
        debug_assert!(reactive.is_eager());
        self.scheduled
            .entry(reactive.subscriber_id())
            .or_insert(reactive);
    }

    /// Run every queued subscriber.
    ///
    /// A failing subscriber does not stop the others. The first error is
    /// returned; later ones are logged.
    pub(crate) fn run(self) -> Result<()> {
        let mut first_error = None;
        for (id, reactive) in self.scheduled {
            if let Err(err) = reactive.schedule() {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(subscriber = id.raw(), error = %err, "tracker failed");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A listener registration: `topic` on `context`.
#[derive(Clone)]
pub(crate) struct Registration {
    context: Weak<ContextInner>,
    topic: Topic,
}

impl Registration {
    fn same(&self, other: &Registration) -> bool {
        self.context.ptr_eq(&other.context) && self.topic == other.topic
    }
}

/// Every place a subscriber must listen to, given its reads and optionally
/// the structural path of a cached value.
pub(crate) fn registrations<'a>(
    reads: impl IntoIterator<Item = &'a Read>,
    structural: Option<(&Path, &Topic)>,
) -> Vec<Registration> {
    let mut out: Vec<Registration> = Vec::new();
    let mut push = |context: &Weak<ContextInner>, topic: Topic| {
        let registration = Registration {
            context: context.clone(),
            topic,
        };
        if !out.iter().any(|existing| existing.same(&registration)) {
            out.push(registration);
        }
    };

    if let Some((path, topic)) = structural {
        for context in path {
            push(context, topic.clone());
        }
    }
    for read in reads {
        let topic = read.probe.topic();
        for context in &read.path {
            push(context, topic.clone());
        }
    }
    out
}

/// Move `subscriber` from the `old` registrations to the `new` ones.
pub(crate) fn rewire(subscriber: &Weak<dyn Reactive>, old: &[Registration], new: &[Registration]) {
    for stale in old.iter().filter(|old| !new.iter().any(|new| new.same(old))) {
        if let Some(context) = stale.context.upgrade() {
            context.unlisten(&stale.topic, subscriber);
        }
    }
    for registration in new {
        if let Some(context) = registration.context.upgrade() {
            context.listen(registration.topic.clone(), subscriber.clone());
        }
    }
}

/// Outcome of re-resolving a subscriber's reads.
pub(crate) enum Validation {
    /// Every read resolves to what was observed, through the same contexts.
    Unchanged,
    /// Same values, but some lookups now pass through other contexts.
    Moved(Vec<Read>),
    /// At least one read resolves to a different value.
    Changed,
}

/// Re-resolve `reads` without recording them.
///
/// A read that failed when it was recorded, whose context is gone, or whose
/// resolution fails now counts as changed; re-running the subscriber will
/// surface the error.
pub(crate) fn revalidate(reads: &[Read]) -> Validation {
    let mut moved = false;
    let mut refreshed = Vec::with_capacity(reads.len());

    for read in reads {
        if read.failed {
            return Validation::Changed;
        }
        let Some(origin) = read.origin.upgrade() else {
            return Validation::Changed;
        };
        let (observed, path) = match resolve::probe(&origin, &read.probe) {
            Ok(resolved) => resolved,
            Err(_) => return Validation::Changed,
        };
        if observed != read.observed {
            return Validation::Changed;
        }
        if !same_path(&path, &read.path) {
            moved = true;
        }
        refreshed.push(Read {
            origin: read.origin.clone(),
            probe: read.probe.clone(),
            path,
            observed,
            failed: false,
        });
    }

    if moved {
        Validation::Moved(refreshed)
    } else {
        Validation::Unchanged
    }
}
