//! Context Nodes
//!
//! A [`Context`] is one scope in a tree of key-value scopes. Lookups that miss
//! locally continue in the parent; keys can be bound to plain values or to
//! value providers computed on demand; and every read made while a provider
//! or tracker runs becomes a dependency that re-triggers it on change.
//!
//! # Example
//!
//! ```rust
//! use strata_core::{Context, Slot, Value};
//!
//! let root = Context::create();
//! root.set_function("sum", |ctx, _| {
//!     let x = ctx.get_as::<i64>("x")?.unwrap_or(0);
//!     let y = ctx.get_as::<i64>("y")?.unwrap_or(0);
//!     Ok(Slot::Present(Value::new(x + y)))
//! })?;
//!
//! let child = root.create_child()?;
//! child.set("x", Value::new(1_i64))?;
//! child.set("y", Value::new(1_i64))?;
//! assert_eq!(child.get_as::<i64>("sum")?, Some(2));
//! # Ok::<(), strata_core::ContextError>(())
//! ```
//!
//! # Disposed contexts
//!
//! Mutations on a disposed context fail with [`ContextError::Disposed`].
//! Reads return unbound and never reach the former parent.

mod activation;
pub(crate) mod resolve;
mod tree;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::collections::{NeutralValueMap, WeakRegistry};
use crate::config::ContextConfig;
use crate::error::{ContextError, Result};
use crate::reactive::{Batch, Change, Key, Probe, Reactive, Topic, Tracker, ValueComputation};
use crate::value::{Binding, ContextFunction, Slot, Value};

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context ID.
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type DisposalListener = Box<dyn FnOnce(&Context) + Send>;

/// Shared state of one context node.
pub(crate) struct ContextInner {
    id: ContextId,
    name: Option<String>,
    config: Arc<ContextConfig>,
    /// Children keep their parent alive, never the other way round.
    parent: RwLock<Option<Context>>,
    children: WeakRegistry<ContextInner>,
    active_child: RwLock<Option<Weak<ContextInner>>>,
    local_values: NeutralValueMap<Key, Binding>,
    modifiable: DashSet<Key>,
    listeners: DashMap<Topic, WeakRegistry<dyn Reactive>>,
    /// Cached provider results of lookups that started here, by topic and
    /// holding context.
    computations: DashMap<(Topic, ContextId), Arc<ValueComputation>>,
    trackers: Mutex<Vec<Arc<Tracker>>>,
    disposal_listeners: Mutex<Vec<DisposalListener>>,
    disposed: AtomicBool,
}

impl ContextInner {
    fn new(name: Option<String>, config: Arc<ContextConfig>, parent: Option<Context>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            name,
            config,
            parent: RwLock::new(parent),
            children: WeakRegistry::new(),
            active_child: RwLock::new(None),
            local_values: NeutralValueMap::new(),
            modifiable: DashSet::new(),
            listeners: DashMap::new(),
            computations: DashMap::new(),
            trackers: Mutex::new(Vec::new()),
            disposal_listeners: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn local_values(&self) -> &NeutralValueMap<Key, Binding> {
        &self.local_values
    }

    pub(crate) fn computations(&self) -> &DashMap<(Topic, ContextId), Arc<ValueComputation>> {
        &self.computations
    }

    pub(crate) fn trackers(&self) -> &Mutex<Vec<Arc<Tracker>>> {
        &self.trackers
    }

    pub(crate) fn parent_inner(&self) -> Option<Arc<ContextInner>> {
        self.parent
            .read()
            .as_ref()
            .map(|parent| parent.inner.clone())
    }

    /// Register `subscriber` for `topic`. Ignored once disposed.
    pub(crate) fn listen(&self, topic: Topic, subscriber: Weak<dyn Reactive>) {
        if self.is_disposed() {
            return;
        }
        // Insert under the entry guard so `unlisten` cannot drop the registry
        // in between.
        self.listeners
            .entry(topic)
            .or_default()
            .insert_unique(subscriber);
    }

    pub(crate) fn unlisten(&self, topic: &Topic, subscriber: &Weak<dyn Reactive>) {
        let emptied = match self.listeners.get(topic) {
            Some(registry) => {
                registry.remove_weak(subscriber);
                registry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.listeners
                .remove_if(topic, |_, registry| registry.is_empty());
        }
    }

    /// Snapshot of the live listeners of `topic`.
    pub(crate) fn listeners_for(&self, topic: &Topic) -> Option<Vec<Arc<dyn Reactive>>> {
        self.listeners
            .get(topic)
            .map(|registry| registry.snapshot())
    }

    fn listener_topics(&self) -> Vec<Topic> {
        self.listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl fmt::Display for ContextInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "context{}", self.id),
        }
    }
}

/// Handle to a context node.
///
/// Cloning is cheap and yields another handle to the same node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a root context with the default configuration.
    pub fn create() -> Self {
        Self::root(None, ContextConfig::default())
    }

    /// Create a root context with `config`.
    pub fn create_with_config(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::root(None, config))
    }

    /// Create a named root context. The name is only used in logs and errors.
    pub fn create_named(name: impl Into<String>) -> Self {
        Self::root(Some(name.into()), ContextConfig::default())
    }

    fn root(name: Option<String>, config: ContextConfig) -> Self {
        let context = Self::from_inner(ContextInner::new(name, Arc::new(config), None));
        debug!(context = %context, "created root context");
        context
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Number of live tracker and computation registrations on this context.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Number of active trackers registered through this context.
    pub fn tracker_count(&self) -> usize {
        self.inner.trackers.lock().len()
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.inner.is_disposed() {
            return Err(ContextError::disposed(&self.inner.to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Look up `key` here or in the nearest ancestor that binds it.
    ///
    /// Null and unbound both give `None`; use [`Context::lookup`] to tell
    /// them apart.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lookup(key)?.into_option())
    }

    /// Look up `key`, reporting whether it is unbound, null or a value.
    pub fn lookup(&self, key: &str) -> Result<Slot<Value>> {
        self.read(Probe::Value(Arc::from(key)))
    }

    /// Look up `key` in this context only.
    pub fn get_local(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read(Probe::Local(Arc::from(key)))?.into_option())
    }

    /// Look up `key` and clone it out as `T`.
    ///
    /// Returns `None` if the key is unbound, null, or holds another type.
    pub fn get_as<T: Any + Clone>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get(key)?
            .and_then(|value| value.downcast_ref::<T>().cloned()))
    }

    /// Whether `key` is bound, possibly to null, here or in an ancestor.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let observed = self.read(Probe::Contains(Arc::from(key)))?;
        Ok(observed
            .into_option()
            .and_then(|value| value.downcast_ref::<bool>().copied())
            .unwrap_or(false))
    }

    /// Whether `key` is bound in this context. Not tracked.
    pub fn contains_local_key(&self, key: &str) -> bool {
        !self.inner.is_disposed() && self.inner.local_values.contains_key(key)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Bind `key` to a value, or to null with `None`.
    ///
    /// Writing a value equal to the current one does nothing.
    pub fn set(&self, key: &str, value: impl Into<Option<Value>>) -> Result<()> {
        self.put(Arc::from(key), value.into().map(Binding::Value))
    }

    /// Bind `key` to a value provider.
    pub fn set_function<F>(&self, key: &str, function: F) -> Result<()>
    where
        F: Fn(&Context, &str) -> Result<Slot<Value>> + Send + Sync + 'static,
    {
        self.put(Arc::from(key), Some(Binding::function(function)))
    }

    /// Bind `key` to any [`ContextFunction`] implementation.
    pub fn set_provider<P: ContextFunction>(&self, key: &str, provider: P) -> Result<()> {
        self.put(Arc::from(key), Some(Binding::provider(provider)))
    }

    /// Bind `key` to an existing binding.
    pub fn bind(&self, key: &str, binding: Binding) -> Result<()> {
        self.put(Arc::from(key), Some(binding))
    }

    /// Remove the local binding of `key`.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.ensure_live()?;
        let key: Key = Arc::from(key);
        if self.inner.local_values.remove(&key).is_absent() {
            return Ok(());
        }
        self.notify(&Topic::Key(key), Change::Slot)
    }

    /// Declare this context the writer of `key` for [`Context::modify`].
    pub fn declare_modifiable(&self, key: &str) -> Result<()> {
        self.ensure_live()?;
        self.inner.modifiable.insert(Arc::from(key));
        Ok(())
    }

    /// Write `key` on the nearest context, starting here, that declared it
    /// modifiable.
    ///
    /// If no context declared it, the write goes here when the key is unbound
    /// everywhere, and fails with [`ContextError::AccessViolation`] otherwise.
    pub fn modify(&self, key: &str, value: impl Into<Option<Value>>) -> Result<()> {
        self.ensure_live()?;
        let key: Key = Arc::from(key);
        let binding = value.into().map(Binding::Value);

        let mut node = Some(self.clone());
        while let Some(current) = node {
            if current.inner.modifiable.contains(&key) {
                return current.put(key, binding);
            }
            node = current.parent();
        }

        if resolve::contains(&self.inner, &key).0 {
            return Err(ContextError::AccessViolation {
                key: key.to_string(),
            });
        }
        self.put(key, binding)
    }

    fn put(&self, key: Key, binding: Option<Binding>) -> Result<()> {
        self.ensure_live()?;
        let previous = self
            .inner
            .local_values
            .put_and_get_old(key.clone(), binding.clone());
        let unchanged = match (&previous, &binding) {
            (Slot::Null, None) => true,
            (Slot::Present(previous), Some(binding)) => previous == binding,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        self.notify(&Topic::Key(key), Change::Slot)
    }

    /// Push one change through a fresh batch and run it.
    pub(crate) fn notify(&self, topic: &Topic, change: Change) -> Result<()> {
        let mut batch = Batch::new();
        batch.propagate(&self.inner, topic, change);
        batch.run()
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Run `callback` now and again whenever a value it read changes.
    ///
    /// The callback returns whether to keep tracking. It re-runs
    /// synchronously on the thread that made the change. The tracker belongs
    /// to this context and stops when it is disposed.
    ///
    /// If the first run fails the tracker is dropped and the error returned.
    pub fn run_and_track<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Context) -> Result<bool> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let tracker = Tracker::new(&self.inner, callback);
        self.inner.trackers.lock().push(tracker.clone());
        if let Err(err) = tracker.execute() {
            tracker.stop();
            return Err(err);
        }
        Ok(())
    }

    /// Call `listener` once when this context is disposed.
    pub fn notify_on_disposal<F>(&self, listener: F) -> Result<()>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        self.ensure_live()?;
        self.inner.disposal_listeners.lock().push(Box::new(listener));
        Ok(())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("values", &self.inner.local_values.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
