//! Activation
//!
//! Every context may point at one active child. Following those pointers
//! from a context leads to its active leaf, which models focus: a lookup of
//! the "active" value of a key is a lookup on that leaf.
//!
//! [`Context::get_active`] is a cached computation owned by the asking
//! context. It reads the active-child pointers along the way and the key on
//! the leaf, so a tracker using it re-runs when the leaf changes or the
//! leaf's value changes, and not when an inactive sibling changes.

use std::sync::{Arc, OnceLock, Weak};

use smallvec::smallvec;

use super::{Context, ContextInner};
use crate::error::Result;
use crate::reactive::{Batch, Change, Probe, Topic};
use crate::value::{ContextFunction, Slot, Value};

/// Provider behind every `get_active` computation.
struct ActiveLookup;

impl ContextFunction for ActiveLookup {
    fn compute(&self, context: &Context, key: &str) -> Result<Slot<Value>> {
        context.active_leaf().lookup(key)
    }
}

pub(crate) fn active_lookup() -> &'static Arc<dyn ContextFunction> {
    static LOOKUP: OnceLock<Arc<dyn ContextFunction>> = OnceLock::new();
    LOOKUP.get_or_init(|| Arc::new(ActiveLookup))
}

impl ContextInner {
    /// The active child, if it is still alive and not disposed.
    pub(crate) fn active_child_inner(&self) -> Option<Arc<ContextInner>> {
        if self.is_disposed() {
            return None;
        }
        self.active_child
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|child| !child.is_disposed())
    }

    /// Clear the active pointer if it designates `child`.
    pub(crate) fn clear_active_if(&self, child: &ContextInner) -> bool {
        let mut active = self.active_child.write();
        let designated = active
            .as_ref()
            .is_some_and(|current| std::ptr::eq(current.as_ptr(), child));
        if designated {
            *active = None;
        }
        designated
    }

    /// Point at `child`. With `clear_replaced`, the active chain below the
    /// child being replaced is cleared as well.
    fn set_active(&self, child: &Arc<ContextInner>, clear_replaced: bool, batch: &mut Batch) {
        let previous = self.active_child.write().replace(Arc::downgrade(child));
        let replaced = match previous {
            Some(previous) if std::ptr::eq(previous.as_ptr(), Arc::as_ptr(child)) => return,
            Some(previous) => previous.upgrade(),
            None => None,
        };
        if clear_replaced {
            if let Some(replaced) = replaced {
                replaced.clear_active_chain(batch);
            }
        }
        batch.propagate(self, &Topic::ActiveChild, Change::Slot);
    }

    fn clear_active_chain(&self, batch: &mut Batch) {
        let previous = self.active_child.write().take();
        if let Some(previous) = previous {
            batch.propagate(self, &Topic::ActiveChild, Change::Slot);
            if let Some(child) = previous.upgrade() {
                child.clear_active_chain(batch);
            }
        }
    }
}

impl Context {
    /// Make this context the active child of its parent.
    pub fn activate(&self) -> Result<()> {
        self.ensure_live()?;
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        let mut batch = Batch::new();
        parent.inner.set_active(&self.inner, false, &mut batch);
        batch.run()
    }

    /// Activate this context and every ancestor up to the root.
    ///
    /// Siblings that lose the active slot on the way have their own active
    /// chain cleared. Pointers below this context are left alone.
    pub fn activate_branch(&self) -> Result<()> {
        self.ensure_live()?;
        let mut batch = Batch::new();
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            parent.inner.set_active(&node.inner, true, &mut batch);
            node = parent;
        }
        batch.run()
    }

    /// Clear the parent's active pointer if it designates this context.
    pub fn deactivate(&self) -> Result<()> {
        self.ensure_live()?;
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        if !parent.inner.clear_active_if(&self.inner) {
            return Ok(());
        }
        parent.notify(&Topic::ActiveChild, Change::Slot)
    }

    /// The direct active child.
    pub fn active_child(&self) -> Option<Context> {
        let child = self.inner.active_child_inner();
        let observed = match &child {
            Some(child) => Slot::Present(Value::new(child.id())),
            None => Slot::Absent,
        };
        self.record(Probe::ActiveChild, smallvec![Arc::downgrade(&self.inner)], observed);
        child.map(Context::from_inner)
    }

    /// Follow active children down to the deepest one; this context if it
    /// has none.
    pub fn active_leaf(&self) -> Context {
        let mut leaf = self.clone();
        while let Some(child) = leaf.active_child() {
            leaf = child;
        }
        leaf
    }

    /// Value of `key` on the active leaf.
    pub fn get_active(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lookup_active(key)?.into_option())
    }

    /// Like [`Context::get_active`], keeping null apart from unbound.
    pub fn lookup_active(&self, key: &str) -> Result<Slot<Value>> {
        self.read(Probe::Active(Arc::from(key)))
    }
}
