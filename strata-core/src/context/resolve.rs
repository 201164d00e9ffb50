//! Lookup resolution.
//!
//! Every public read goes through [`Context::read`]: the probe is resolved
//! here, and if a tracking frame is open the result is recorded as a
//! dependency together with the contexts the lookup passed through.
//! Re-validation calls [`probe`] directly so nothing is recorded twice.

use std::sync::Arc;

use smallvec::smallvec;
use tracing::trace;

use super::{Context, ContextId, ContextInner};
use crate::error::Result;
use crate::reactive::{Key, Path, Probe, Read, Topic, Tracking, ValueComputation};
use crate::value::{Binding, ContextFunction, Slot, Value};

impl Context {
    /// Resolve `probe` and record it in the current tracking frame.
    ///
    /// A failed lookup is recorded too, so the reader hears about the
    /// computation it depends on once that computation can succeed again.
    pub(crate) fn read(&self, probe: Probe) -> Result<Slot<Value>> {
        match self::probe(&self.inner, &probe) {
            Ok((observed, path)) => {
                self.record(probe, path, observed.clone());
                Ok(observed)
            }
            Err(err) => {
                if Tracking::is_active() {
                    let origin = Arc::downgrade(&self.inner);
                    Tracking::record(Read::failed(origin.clone(), probe, smallvec![origin]));
                }
                Err(err)
            }
        }
    }

    pub(crate) fn record(&self, probe: Probe, path: Path, observed: Slot<Value>) {
        if self.inner.config.trace_lookups {
            trace!(context = %self.inner, probe = ?probe, observed = ?observed, "lookup");
        }
        if Tracking::is_active() {
            Tracking::record(Read {
                origin: Arc::downgrade(&self.inner),
                probe,
                path,
                observed,
                failed: false,
            });
        }
    }
}

/// Resolve `probe` against `origin` without recording it.
pub(crate) fn probe(origin: &Arc<ContextInner>, probe: &Probe) -> Result<(Slot<Value>, Path)> {
    match probe {
        Probe::Value(key) => value(origin, key),
        Probe::Local(key) => local(origin, key),
        Probe::Contains(key) => {
            let (found, path) = contains(origin, key);
            Ok((Slot::Present(Value::new(found)), path))
        }
        Probe::ActiveChild => {
            let observed = match origin.active_child_inner() {
                Some(child) => Slot::Present(Value::new(child.id())),
                None => Slot::Absent,
            };
            Ok((observed, smallvec![Arc::downgrade(origin)]))
        }
        Probe::Active(key) => {
            let path: Path = smallvec![Arc::downgrade(origin)];
            if origin.is_disposed() {
                return Ok((Slot::Absent, path));
            }
            let function = super::activation::active_lookup();
            let topic = Topic::Active(key.clone());
            let slot = computation(origin, topic, origin.id(), &path, function).value()?;
            Ok((slot, path))
        }
    }
}

/// Walk from `origin` towards the root until a context binds `key`.
///
/// A provider answering [`Slot::Absent`] is skipped as if the key were
/// unbound there.
fn value(origin: &Arc<ContextInner>, key: &Key) -> Result<(Slot<Value>, Path)> {
    let mut path: Path = smallvec![Arc::downgrade(origin)];
    let mut node = origin.clone();

    loop {
        if node.is_disposed() {
            return Ok((Slot::Absent, path));
        }
        match node.local_values().get_slot(key) {
            Slot::Present(Binding::Value(value)) => return Ok((Slot::Present(value), path)),
            Slot::Null => return Ok((Slot::Null, path)),
            Slot::Present(Binding::Function(function)) => {
                let topic = Topic::Key(key.clone());
                let slot = computation(origin, topic, node.id(), &path, &function).value()?;
                if !slot.is_absent() {
                    return Ok((slot, path));
                }
            }
            Slot::Absent => {}
        }

        let Some(parent) = node.parent_inner() else {
            return Ok((Slot::Absent, path));
        };
        path.push(Arc::downgrade(&parent));
        node = parent;
    }
}

fn local(origin: &Arc<ContextInner>, key: &Key) -> Result<(Slot<Value>, Path)> {
    let path: Path = smallvec![Arc::downgrade(origin)];
    if origin.is_disposed() {
        return Ok((Slot::Absent, path));
    }
    let slot = match origin.local_values().get_slot(key) {
        Slot::Present(Binding::Value(value)) => Slot::Present(value),
        Slot::Present(Binding::Function(function)) => {
            let topic = Topic::Key(key.clone());
            computation(origin, topic, origin.id(), &path, &function).value()?
        }
        Slot::Null => Slot::Null,
        Slot::Absent => Slot::Absent,
    };
    Ok((slot, path))
}

/// Whether any context from `origin` to the root binds `key`.
pub(crate) fn contains(origin: &Arc<ContextInner>, key: &Key) -> (bool, Path) {
    let mut path: Path = smallvec![Arc::downgrade(origin)];
    let mut node = origin.clone();

    loop {
        if node.is_disposed() {
            return (false, path);
        }
        if node.local_values().contains_key(key) {
            return (true, path);
        }
        let Some(parent) = node.parent_inner() else {
            return (false, path);
        };
        path.push(Arc::downgrade(&parent));
        node = parent;
    }
}

/// The cached computation for `topic` held by `holder`, created on first
/// use. A cached entry built from another provider is replaced.
pub(crate) fn computation(
    origin: &Arc<ContextInner>,
    topic: Topic,
    holder: ContextId,
    structural: &Path,
    function: &Arc<dyn ContextFunction>,
) -> Arc<ValueComputation> {
    let fresh_topic = topic.clone();
    let key = (topic, holder);
    let existing = origin
        .computations()
        .get(&key)
        .map(|entry| entry.value().clone());
    if let Some(existing) = existing {
        if existing.uses(function) && !existing.is_discarded() {
            return existing;
        }
        existing.discard();
    }

    origin
        .computations()
        .entry(key)
        .or_insert_with(|| {
            ValueComputation::new(origin, fresh_topic, holder, structural.clone(), function.clone())
        })
        .value()
        .clone()
}
