//! Tree operations: children, reparenting and disposal.

use tracing::{debug, warn};

use super::{Context, ContextInner};
use crate::error::{ContextError, Result};
use crate::reactive::{Batch, Change, Topic};

impl Context {
    /// Create an anonymous child context.
    pub fn create_child(&self) -> Result<Context> {
        self.spawn_child(None)
    }

    /// Create a child context with a debug name.
    pub fn create_named_child(&self, name: impl Into<String>) -> Result<Context> {
        self.spawn_child(Some(name.into()))
    }

    fn spawn_child(&self, name: Option<String>) -> Result<Context> {
        self.ensure_live()?;
        let inner = ContextInner::new(name, self.inner.config.clone(), Some(self.clone()));
        self.inner.children.insert(&inner);
        let child = Context::from_inner(inner);
        debug!(context = %child, parent = %self, "created child context");
        Ok(child)
    }

    /// The current parent. Not tracked.
    pub fn parent(&self) -> Option<Context> {
        self.inner.parent.read().clone()
    }

    /// Live children of this context.
    pub fn children(&self) -> Vec<Context> {
        self.inner
            .children
            .iter()
            .filter(|child| !child.is_disposed())
            .map(Context::from_inner)
            .collect()
    }

    /// Whether `ancestor` is this context or one of its ancestors.
    fn descends_from(&self, ancestor: &Context) -> bool {
        let mut node = Some(self.clone());
        while let Some(current) = node {
            if current == *ancestor {
                return true;
            }
            node = current.parent();
        }
        false
    }

    /// Move this context under `parent`, or make it a root with `None`.
    ///
    /// Every computation that resolved a key through this context is
    /// re-validated against the new chain and only re-runs if the value it
    /// read is different. Setting the current parent again does nothing.
    pub fn set_parent(&self, parent: Option<&Context>) -> Result<()> {
        self.ensure_live()?;
        if let Some(parent) = parent {
            parent.ensure_live()?;
            if parent.descends_from(self) {
                return Err(ContextError::CyclicParent);
            }
        }

        let previous = {
            let mut slot = self.inner.parent.write();
            if slot.as_ref() == parent {
                return Ok(());
            }
            std::mem::replace(&mut *slot, parent.cloned())
        };

        let mut batch = Batch::new();
        if let Some(previous) = &previous {
            previous.inner.children.remove(&self.inner);
            if previous.inner.clear_active_if(&self.inner) {
                batch.propagate(&previous.inner, &Topic::ActiveChild, Change::Slot);
            }
        }
        if let Some(parent) = parent {
            parent.inner.children.insert(&self.inner);
        }
        debug!(
            context = %self,
            from = ?previous.as_ref().map(Context::id),
            to = ?parent.map(Context::id),
            "reparented context"
        );

        for topic in self.inner.listener_topics() {
            if let Topic::Key(_) = topic {
                batch.propagate(&self.inner, &topic, Change::Parent);
            }
        }
        batch.run()
    }

    /// Dispose this context and its subtree. Idempotent.
    ///
    /// Children are disposed first. Then the disposal listeners run, the
    /// local values are cleared, the context leaves its parent, and every
    /// tracker and computation it owns is stopped. Computations elsewhere
    /// that read from it are notified.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }

        for child in self.inner.children.snapshot() {
            Context::from_inner(child).dispose();
        }

        let listeners = std::mem::take(&mut *self.inner.disposal_listeners.lock());
        for listener in listeners {
            listener(self);
        }

        self.inner.local_values.clear();
        self.inner.modifiable.clear();

        let mut batch = Batch::new();
        let previous = self.inner.parent.write().take();
        if let Some(previous) = &previous {
            previous.inner.children.remove(&self.inner);
            if previous.inner.clear_active_if(&self.inner) {
                batch.propagate(&previous.inner, &Topic::ActiveChild, Change::Slot);
            }
        }
        self.inner.active_child.write().take();

        let trackers = std::mem::take(&mut *self.inner.trackers.lock());
        for tracker in trackers {
            tracker.stop();
        }

        let computations: Vec<_> = self
            .inner
            .computations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for computation in computations {
            computation.discard();
        }
        self.inner.computations.clear();

        for topic in self.inner.listener_topics() {
            batch.propagate(&self.inner, &topic, Change::Slot);
        }
        self.inner.listeners.clear();

        if let Err(err) = batch.run() {
            warn!(context = %self, error = %err, "tracker failed while disposing context");
        }
        debug!(context = %self, "disposed context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn children_are_tracked_weakly() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        assert_eq!(root.children(), vec![child.clone()]);

        drop(child);
        assert!(root.children().is_empty());
    }

    #[test]
    fn set_parent_moves_between_child_sets() {
        let first = Context::create();
        let second = Context::create();
        let child = first.create_child().unwrap();

        child.set_parent(Some(&second)).unwrap();
        assert!(first.children().is_empty());
        assert_eq!(second.children(), vec![child.clone()]);
        assert_eq!(child.parent(), Some(second));
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();

        assert!(matches!(root.set_parent(Some(&grandchild)), Err(ContextError::CyclicParent)));
        assert!(matches!(root.set_parent(Some(&root)), Err(ContextError::CyclicParent)));
    }

    #[test]
    fn detached_context_stops_delegating() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        root.set("k", Value::new(1)).unwrap();

        child.set_parent(None).unwrap();
        assert_eq!(child.get("k").unwrap(), None);
        assert!(child.parent().is_none());
    }

    #[test]
    fn dispose_cascades_and_fires_listeners_once() {
        let fired = Arc::new(AtomicI32::new(0));
        let root = Context::create();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();
        for context in [&child, &grandchild] {
            let fired = fired.clone();
            context
                .notify_on_disposal(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        child.dispose();
        child.dispose();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(grandchild.is_disposed());
        assert!(root.children().is_empty());
        assert!(child.parent().is_none());
    }

    #[test]
    fn disposed_context_does_not_reach_parent() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        root.set("k", Value::new(1)).unwrap();
        child.set("own", Value::new(2)).unwrap();

        child.dispose();
        assert_eq!(child.get("k").unwrap(), None);
        assert_eq!(child.get("own").unwrap(), None);
        assert!(!child.contains_key("k").unwrap());
    }

    #[test]
    fn dispose_stops_trackers_and_clears_listeners() {
        let runs = Arc::new(AtomicI32::new(0));
        let root = Context::create();
        let child = root.create_child().unwrap();
        root.set("k", Value::new(1)).unwrap();

        let counter = runs.clone();
        child
            .run_and_track(move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.get("k")?;
                Ok(true)
            })
            .unwrap();
        assert_eq!(root.listener_count(), 1);

        child.dispose();
        assert_eq!(child.tracker_count(), 0);
        assert_eq!(child.listener_count(), 0);
        assert_eq!(root.listener_count(), 0);

        root.set("k", Value::new(2)).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
