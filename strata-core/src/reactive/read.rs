//! Dependency Records
//!
//! A [`Read`] is one dependency edge: "this computation asked `origin` for
//! `probe` and saw `observed`". The lookup walks from the origin towards the
//! root; every context on the way is kept in the read's `path`, and the
//! computation is registered as a listener on each of them under the read's
//! [`Topic`]. A change to any of those contexts therefore reaches it.
//!
//! Keeping the observed value lets a notified computation re-validate the read
//! instead of re-running: if resolving the same probe again gives an equal
//! value, the edge did not really change.

use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::context::ContextInner;
use crate::value::{Slot, Value};

/// Keys are shared strings.
pub(crate) type Key = Arc<str>;

/// Contexts visited by one lookup, origin first.
pub(crate) type Path = SmallVec<[Weak<ContextInner>; 4]>;

/// What a listener is registered for on a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Topic {
    /// The slot for a key.
    Key(Key),
    /// The active-child pointer.
    ActiveChild,
    /// The value of a key on the active leaf below the context.
    Active(Key),
}

/// How a read was performed, so it can be repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Probe {
    /// `get`: walk up the parent chain.
    Value(Key),
    /// `get_local`: this context only.
    Local(Key),
    /// `contains_key`: walk up, observe presence.
    Contains(Key),
    /// `active_child`.
    ActiveChild,
    /// `get_active`.
    Active(Key),
}

impl Probe {
    pub(crate) fn topic(&self) -> Topic {
        match self {
            Probe::Value(key) | Probe::Local(key) | Probe::Contains(key) => {
                Topic::Key(key.clone())
            }
            Probe::ActiveChild => Topic::ActiveChild,
            Probe::Active(key) => Topic::Active(key.clone()),
        }
    }
}

/// One recorded dependency edge.
#[derive(Clone)]
pub(crate) struct Read {
    pub(crate) origin: Weak<ContextInner>,
    pub(crate) probe: Probe,
    pub(crate) path: Path,
    pub(crate) observed: Slot<Value>,
    /// The lookup failed; `observed` is meaningless and the read never
    /// re-validates.
    pub(crate) failed: bool,
}

impl Read {
    /// A read that ended in an error.
    pub(crate) fn failed(origin: Weak<ContextInner>, probe: Probe, path: Path) -> Self {
        Self {
            origin,
            probe,
            path,
            observed: Slot::Absent,
            failed: true,
        }
    }

    /// Same origin, same probe, same observation.
    pub(crate) fn duplicates(&self, other: &Read) -> bool {
        self.origin.ptr_eq(&other.origin)
            && self.probe == other.probe
            && self.failed == other.failed
            && self.observed == other.observed
    }
}

pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a.ptr_eq(b))
}

/// Index of `context` in `path`.
pub(crate) fn path_position(path: &Path, context: &ContextInner) -> Option<usize> {
    path.iter()
        .position(|entry| std::ptr::eq(entry.as_ptr(), context as *const ContextInner))
}
