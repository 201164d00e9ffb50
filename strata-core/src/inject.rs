//! Injection
//!
//! Builds objects out of context values. A [`Descriptor`] names the keys an
//! object needs and how to construct it from them; the [`Injector`] resolves
//! those keys against a context, either once ([`Injector::populate`]) or
//! continuously ([`Injector::inject`]), in which case the object is rebuilt
//! whenever one of its requirements changes.
//!
//! # Example
//!
//! ```rust
//! use strata_core::inject::{Descriptor, Injector};
//! use strata_core::{Context, Value};
//!
//! struct Greeter {
//!     name: String,
//! }
//!
//! let descriptor = Descriptor::builder("Greeter")
//!     .required("user")
//!     .build(|resolved| {
//!         Ok(Greeter {
//!             name: resolved.get_as::<String>("user").unwrap_or_default(),
//!         })
//!     });
//!
//! let context = Context::create();
//! context.set("user", Value::new(String::from("ada")))?;
//! let greeter = Injector::populate(&descriptor, &context)?;
//! assert_eq!(greeter.name, "ada");
//! # Ok::<(), strata_core::ContextError>(())
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::error::{ContextError, Result};
use crate::value::{Slot, Value};

/// How a requirement is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    /// Must be bound, possibly to null.
    Required,
    /// Resolves to `None` when unbound.
    Optional,
    /// Resolved on the active leaf and must be bound there.
    Active,
}

/// One named input of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub kind: RequirementKind,
}

type Constructor<T> = dyn Fn(&Resolved) -> Result<T> + Send + Sync;
type UninjectHook<T> = dyn Fn(&T) + Send + Sync;

/// Recipe for building a `T` from context values.
pub struct Descriptor<T> {
    target: String,
    requirements: Vec<Requirement>,
    construct: Box<Constructor<T>>,
    uninject: Option<Box<UninjectHook<T>>>,
}

impl<T> Descriptor<T> {
    /// Start describing `target`. The name shows up in errors and logs.
    pub fn builder(target: impl Into<String>) -> DescriptorBuilder<T> {
        DescriptorBuilder {
            target: target.into(),
            requirements: Vec::new(),
            uninject: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("target", &self.target)
            .field("requirements", &self.requirements)
            .field("uninject", &self.uninject.is_some())
            .finish()
    }
}

/// Builder for [`Descriptor`].
pub struct DescriptorBuilder<T> {
    target: String,
    requirements: Vec<Requirement>,
    uninject: Option<Box<UninjectHook<T>>>,
}

impl<T> DescriptorBuilder<T> {
    fn requirement(mut self, key: impl Into<String>, kind: RequirementKind) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            kind,
        });
        self
    }

    pub fn required(self, key: impl Into<String>) -> Self {
        self.requirement(key, RequirementKind::Required)
    }

    pub fn optional(self, key: impl Into<String>) -> Self {
        self.requirement(key, RequirementKind::Optional)
    }

    /// Require `key` as seen by the active leaf.
    pub fn active(self, key: impl Into<String>) -> Self {
        self.requirement(key, RequirementKind::Active)
    }

    /// Called with the last injected target when its context is disposed.
    pub fn on_uninject<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.uninject = Some(Box::new(hook));
        self
    }

    pub fn build<F>(self, construct: F) -> Descriptor<T>
    where
        F: Fn(&Resolved) -> Result<T> + Send + Sync + 'static,
    {
        Descriptor {
            target: self.target,
            requirements: self.requirements,
            construct: Box::new(construct),
            uninject: self.uninject,
        }
    }
}

/// The values resolved for a descriptor, in requirement order.
///
/// A key maps to `None` when it is bound to null, or when it is optional and
/// unbound.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    values: IndexMap<String, Option<Value>>,
}

impl Resolved {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn get_as<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Whether `key` was requested.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_ref()))
    }
}

/// Resolves descriptors against contexts.
pub struct Injector;

impl Injector {
    /// Resolve every requirement of `descriptor` and construct the target.
    ///
    /// Fails with [`ContextError::Injection`] on the first required key that
    /// is unbound. Reads are tracked when called inside a tracker.
    pub fn populate<T>(descriptor: &Descriptor<T>, context: &Context) -> Result<T> {
        let mut resolved = Resolved::default();
        for requirement in &descriptor.requirements {
            let key = requirement.key.as_str();
            let slot = match requirement.kind {
                RequirementKind::Required | RequirementKind::Optional => context.lookup(key)?,
                RequirementKind::Active => context.lookup_active(key)?,
            };
            if slot.is_absent() && requirement.kind != RequirementKind::Optional {
                return Err(ContextError::Injection {
                    target: descriptor.target.clone(),
                    key: requirement.key.clone(),
                });
            }
            resolved
                .values
                .insert(requirement.key.clone(), slot.into_option());
        }
        (descriptor.construct)(&resolved)
    }

    /// Build the target now and rebuild it whenever a requirement changes.
    ///
    /// Every built target is handed to `sink`. When `context` is disposed,
    /// the descriptor's uninject hook runs on the last target. Fails if the
    /// first injection fails, in which case nothing stays registered.
    pub fn inject<T, S>(descriptor: Descriptor<T>, context: &Context, sink: S) -> Result<()>
    where
        T: Send + Sync + 'static,
        S: Fn(Arc<T>) -> Result<()> + Send + Sync + 'static,
    {
        let descriptor = Arc::new(descriptor);
        let last: Arc<Mutex<Option<Arc<T>>>> = Arc::new(Mutex::new(None));

        let tracked = descriptor.clone();
        let current = last.clone();
        context.run_and_track(move |ctx| {
            let target = Arc::new(Injector::populate(&tracked, ctx)?);
            debug!(context = %ctx, descriptor = %tracked.target, "injected");
            *current.lock() = Some(target.clone());
            sink(target)?;
            Ok(true)
        })?;

        context.notify_on_disposal(move |ctx| {
            let Some(target) = last.lock().take() else {
                return;
            };
            if let Some(hook) = &descriptor.uninject {
                debug!(context = %ctx, descriptor = %descriptor.target, "uninjecting");
                hook(&target);
            }
        })
    }

    /// Resolve `keys` once and call `f` with them. Every key is required.
    pub fn invoke<R, F>(context: &Context, keys: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Resolved) -> Result<R>,
    {
        let mut resolved = Resolved::default();
        for key in keys {
            match context.lookup(key)? {
                Slot::Absent => {
                    return Err(ContextError::Injection {
                        target: "invocation".to_string(),
                        key: key.to_string(),
                    })
                }
                slot => {
                    resolved.values.insert(key.to_string(), slot.into_option());
                }
            }
        }
        f(&resolved)
    }
}
