//! Value Computation
//!
//! A [`ValueComputation`] is the cached result of one value provider
//! evaluation, together with the reads that produced it.
//!
//! # How Computations Work
//!
//! 1. The first lookup that reaches a provider creates the computation in the
//!    cache of the context the lookup started from, and runs the provider
//!    against that context inside a tracking frame.
//!
//! 2. Later lookups return the cached slot while the computation is clean.
//!
//! 3. When something it read changes, it is marked "maybe dirty", stops
//!    listening, and passes the mark on to the subscribers that read it.
//!    Nothing is recomputed yet. Its reads are kept.
//!
//! 4. On the next access it re-validates those reads. If none changed it is
//!    clean again and listens to them anew; otherwise it recomputes.
//!
//! A computation is discarded outright when the slot it was built from is
//! replaced: a write of the same key on any context between the lookup's
//! origin and the provider's holder. It is also discarded when its origin is
//! disposed.
//!
//! A provider that fails leaves the computation without a value but with the
//! reads it made before failing, so a change to one of them tells the readers
//! to try again.
//!
//! # Thread Safety
//!
//! State lives behind a mutex that is never held while the provider runs.
//! Two threads may compute the same value concurrently; the last one to
//! finish installs its reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::read::{path_position, Path, Read, Topic};
use super::runtime::{
    registrations, revalidate, rewire, Batch, Change, Reactive, Registration, Validation,
};
use super::tracking::Tracking;
use super::SubscriberId;
use crate::context::{Context, ContextId, ContextInner};
use crate::error::{ContextError, Result};
use crate::value::{same_function, ContextFunction, Slot, Value};

/// Dirty state for a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The computation definitely needs to recompute.
    Dirty,
}

struct MemoInner {
    state: MemoState,
    /// Bumped on every mark so a slow re-validation cannot clobber a newer
    /// mark.
    epoch: u64,
    cached: Option<Slot<Value>>,
    reads: Vec<Read>,
    registrations: Vec<Registration>,
}

/// A cached provider result.
pub(crate) struct ValueComputation {
    id: SubscriberId,
    origin: Weak<ContextInner>,
    topic: Topic,
    holder: ContextId,
    function: Arc<dyn ContextFunction>,
    /// Contexts from the origin to the holder.
    structural: Path,
    short_circuit: bool,
    discarded: AtomicBool,
    inner: Mutex<MemoInner>,
    this: Weak<ValueComputation>,
}

impl ValueComputation {
    pub(crate) fn new(
        origin: &Arc<ContextInner>,
        topic: Topic,
        holder: ContextId,
        structural: Path,
        function: Arc<dyn ContextFunction>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: SubscriberId::new(),
            origin: Arc::downgrade(origin),
            topic,
            holder,
            function,
            structural,
            short_circuit: origin.config().equality_short_circuit,
            discarded: AtomicBool::new(false),
            inner: Mutex::new(MemoInner {
                state: MemoState::Dirty,
                epoch: 0,
                cached: None,
                reads: Vec::new(),
                registrations: Vec::new(),
            }),
            this: this.clone(),
        })
    }

    /// Key of the cache entry in the origin.
    pub(crate) fn cache_key(&self) -> (Topic, ContextId) {
        (self.topic.clone(), self.holder)
    }

    /// Whether this computation was built from `function`.
    pub(crate) fn uses(&self, function: &Arc<dyn ContextFunction>) -> bool {
        same_function(&self.function, function)
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> MemoState {
        self.inner.lock().state
    }

    pub(crate) fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    fn key(&self) -> &str {
        match &self.topic {
            Topic::Key(key) | Topic::Active(key) => key,
            Topic::ActiveChild => "",
        }
    }

    fn as_reactive(&self) -> Weak<dyn Reactive> {
        self.this.clone()
    }

    /// The current value, re-validating or recomputing as needed.
    pub(crate) fn value(&self) -> Result<Slot<Value>> {
        if Tracking::is_running(self.id) {
            return Err(ContextError::Cycle {
                key: self.key().to_string(),
            });
        }
        let Some(origin) = self.origin.upgrade() else {
            return Ok(Slot::Absent);
        };

        let pending = {
            let inner = self.inner.lock();
            match (inner.state, &inner.cached) {
                (MemoState::Clean, Some(cached)) => return Ok(cached.clone()),
                (MemoState::MaybeDirty, Some(_)) => Some((inner.epoch, inner.reads.clone())),
                _ => None,
            }
        };

        if let Some((epoch, reads)) = pending {
            match revalidate(&reads) {
                Validation::Unchanged => {
                    if let Some(cached) = self.settle(epoch, None) {
                        return Ok(cached);
                    }
                }
                Validation::Moved(reads) => {
                    if let Some(cached) = self.settle(epoch, Some(reads)) {
                        return Ok(cached);
                    }
                }
                Validation::Changed => {}
            }
        }

        self.recompute(&origin)
    }

    /// Mark clean after a successful re-validation, unless a newer change
    /// arrived meanwhile.
    fn settle(&self, epoch: u64, moved: Option<Vec<Read>>) -> Option<Slot<Value>> {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || self.is_discarded() {
            return None;
        }
        let reads = match moved {
            Some(reads) => reads,
            None => std::mem::take(&mut inner.reads),
        };
        self.install(&mut inner, reads);
        inner.state = MemoState::Clean;
        inner.cached.clone()
    }

    fn recompute(&self, origin: &Arc<ContextInner>) -> Result<Slot<Value>> {
        let limit = origin.config().recursion_limit;
        if Tracking::depth() >= limit {
            self.discard();
            return Err(ContextError::RecursionLimit { limit });
        }

        let epoch = self.inner.lock().epoch;
        let frame = Tracking::enter(self.id);
        let context = Context::from_inner(origin.clone());
        let outcome = self.function.compute(&context, self.key());
        let reads = frame.finish();

        let mut inner = self.inner.lock();
        if self.is_discarded() {
            return outcome;
        }
        self.install(&mut inner, reads);
        match outcome {
            Ok(slot) => {
                inner.cached = Some(slot.clone());
                if inner.epoch == epoch {
                    inner.state = MemoState::Clean;
                }
                Ok(slot)
            }
            Err(err) => {
                inner.cached = None;
                inner.state = MemoState::Dirty;
                debug!(context = %origin, key = self.key(), error = %err, "computation failed");
                Err(err)
            }
        }
    }

    /// Listen to `reads` and the structural slots, and drop older listens.
    fn install(&self, inner: &mut MemoInner, reads: Vec<Read>) {
        let new = registrations(&reads, Some((&self.structural, &self.topic)));
        rewire(&self.as_reactive(), &inner.registrations, &new);
        inner.registrations = new;
        inner.reads = reads;
    }

    /// Drop the cached value and every registration, and leave the origin's
    /// cache. Idempotent.
    pub(crate) fn discard(&self) {
        if self.discarded.swap(true, Ordering::AcqRel) {
            return;
        }

        let stale = {
            let mut inner = self.inner.lock();
            inner.cached = None;
            inner.reads.clear();
            inner.state = MemoState::Dirty;
            std::mem::take(&mut inner.registrations)
        };
        rewire(&self.as_reactive(), &stale, &[]);

        if let Some(origin) = self.origin.upgrade() {
            let key = self.cache_key();
            origin
                .computations()
                .remove_if(&key, |_, cached| std::ptr::eq(Arc::as_ptr(cached), self));
            debug!(context = %origin, key = self.key(), "discarded computation");
        }
    }
}

impl Reactive for ValueComputation {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_maybe_dirty(
        &self,
        source: &ContextInner,
        topic: &Topic,
        change: Change,
        batch: &mut Batch,
    ) {
        let first = batch.first_visit(self.id);

        // A slot between origin and holder was replaced, or the chain above a
        // context that did not hold the provider moved.
        let position = if *topic == self.topic {
            path_position(&self.structural, source)
        } else {
            None
        };
        let replaced = match (change, position) {
            (Change::Slot, Some(_)) => true,
            (Change::Parent, Some(index)) => index + 1 < self.structural.len(),
            _ => false,
        };

        if replaced {
            self.discard();
        } else if first {
            // Listening resumes once the kept reads are re-validated.
            let stale = {
                let mut inner = self.inner.lock();
                inner.epoch += 1;
                inner.state = match (inner.state, self.short_circuit) {
                    (MemoState::Dirty, _) | (_, false) => MemoState::Dirty,
                    _ => MemoState::MaybeDirty,
                };
                std::mem::take(&mut inner.registrations)
            };
            rewire(&self.as_reactive(), &stale, &[]);
        }

        if first {
            if let Some(origin) = self.origin.upgrade() {
                batch.propagate(&origin, &self.topic, Change::Derived);
            }
        }
    }

    fn schedule(&self) -> Result<()> {
        Ok(())
    }

    fn is_eager(&self) -> bool {
        false
    }
}
