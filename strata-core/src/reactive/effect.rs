//! Tracker Implementation
//!
//! A [`Tracker`] is a user callback that re-runs whenever a context value it
//! read during its last run changes.
//!
//! # How Trackers Work
//!
//! 1. When registered, the tracker runs its callback immediately to
//!    establish its initial reads.
//!
//! 2. When any read is invalidated, the tracker is queued in the batch of the
//!    mutation that caused it.
//!
//! 3. When the batch runs, the tracker re-validates its reads and re-runs
//!    only if one of them resolves to a different value. A run replaces the
//!    whole read set, so keys it stopped reading no longer wake it.
//!
//! 4. A callback returning `Ok(false)` stops the tracker.
//!
//! # Ownership
//!
//! The context the tracker was registered on owns it. Contexts it reads from
//! only hold it weakly; disposing the owner stops it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::memo::MemoState;
use super::read::{Read, Topic};
use super::runtime::{
    registrations, revalidate, rewire, Batch, Change, Reactive, Registration, Validation,
};
use super::tracking::Tracking;
use super::SubscriberId;
use crate::context::{Context, ContextInner};
use crate::error::{ContextError, Result};

/// Callback type of a tracker; the result says whether to keep tracking.
pub(crate) type TrackerFn = dyn Fn(&Context) -> Result<bool> + Send + Sync;

struct TrackerInner {
    state: MemoState,
    reads: Vec<Read>,
    registrations: Vec<Registration>,
}

/// A side-effecting callback that re-runs when its reads change.
pub(crate) struct Tracker {
    id: SubscriberId,
    owner: Weak<ContextInner>,
    callback: Box<TrackerFn>,
    short_circuit: bool,
    stopped: AtomicBool,
    run_count: AtomicUsize,
    inner: Mutex<TrackerInner>,
    this: Weak<Tracker>,
}

impl Tracker {
    pub(crate) fn new<F>(owner: &Arc<ContextInner>, callback: F) -> Arc<Self>
    where
        F: Fn(&Context) -> Result<bool> + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| Self {
            id: SubscriberId::new(),
            owner: Arc::downgrade(owner),
            callback: Box::new(callback),
            short_circuit: owner.config().equality_short_circuit,
            stopped: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            inner: Mutex::new(TrackerInner {
                state: MemoState::Dirty,
                reads: Vec::new(),
                registrations: Vec::new(),
            }),
            this: this.clone(),
        })
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of times the callback has run.
    pub(crate) fn run_count(&self) -> usize {
        self.run_count.load(Ordering::Relaxed)
    }

    fn as_reactive(&self) -> Weak<dyn Reactive> {
        self.this.clone()
    }

    /// Run the callback and install the reads it made.
    pub(crate) fn execute(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let owner = match self.owner.upgrade() {
            Some(owner) if !owner.is_disposed() => owner,
            _ => {
                self.stop();
                return Ok(());
            }
        };

        let limit = owner.config().recursion_limit;
        if Tracking::depth() >= limit {
            return Err(ContextError::RecursionLimit { limit });
        }

        self.inner.lock().state = MemoState::Clean;
        let frame = Tracking::enter(self.id);
        let context = Context::from_inner(owner);
        let outcome = (self.callback)(&context);
        let reads = frame.finish();
        self.run_count.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(true) => {
                self.replace_reads(reads);
                Ok(())
            }
            Ok(false) => {
                self.stop();
                Ok(())
            }
            Err(err) => {
                self.replace_reads(reads);
                Err(err)
            }
        }
    }

    fn replace_reads(&self, reads: Vec<Read>) {
        if self.is_stopped() {
            return;
        }
        let mut inner = self.inner.lock();
        let new = registrations(&reads, None);
        rewire(&self.as_reactive(), &inner.registrations, &new);
        inner.registrations = new;
        inner.reads = reads;
    }

    /// Deregister from every context and leave the owner. Idempotent.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let stale = {
            let mut inner = self.inner.lock();
            inner.reads.clear();
            std::mem::take(&mut inner.registrations)
        };
        rewire(&self.as_reactive(), &stale, &[]);

        if let Some(owner) = self.owner.upgrade() {
            owner
                .trackers()
                .lock()
                .retain(|tracker| !std::ptr::eq(Arc::as_ptr(tracker), self));
            debug!(context = %owner, runs = self.run_count(), "tracker stopped");
        }
    }
}

impl Reactive for Tracker {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_maybe_dirty(
        &self,
        _source: &ContextInner,
        _topic: &Topic,
        _change: Change,
        batch: &mut Batch,
    ) {
        if self.is_stopped() || !batch.first_visit(self.id) {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.state = if inner.state == MemoState::Dirty || !self.short_circuit {
                MemoState::Dirty
            } else {
                MemoState::MaybeDirty
            };
        }
        if let Some(this) = self.this.upgrade() {
            batch.schedule(this);
        }
    }

    fn schedule(&self) -> Result<()> {
        if self.is_stopped() || Tracking::is_running(self.id) {
            return Ok(());
        }

        let pending = {
            let inner = self.inner.lock();
            match inner.state {
                MemoState::Clean => return Ok(()),
                MemoState::MaybeDirty => Some(inner.reads.clone()),
                MemoState::Dirty => None,
            }
        };

        if let Some(reads) = pending {
            match revalidate(&reads) {
                Validation::Unchanged => {
                    self.inner.lock().state = MemoState::Clean;
                    return Ok(());
                }
                Validation::Moved(reads) => {
                    self.replace_reads(reads);
                    self.inner.lock().state = MemoState::Clean;
                    return Ok(());
                }
                Validation::Changed => {}
            }
        }

        self.execute()
    }

    fn is_eager(&self) -> bool {
        true
    }
}
