//! Strata Core
//!
//! This crate provides a hierarchical reactive context engine. It implements:
//!
//! - A tree of scoped key-value contexts with parent delegation
//! - Computed bindings, cached per context and re-validated lazily
//! - Trackers that re-run when a value they read changes
//! - An activation chain modelling focus, and injection on top of it
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `context`: Context nodes, lookups, reparenting and activation
//! - `reactive`: Dependency recording and invalidation
//! - `collections`: Concurrent storage primitives the contexts are built from
//! - `inject`: Descriptor-based injection of context values
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! use strata_core::{Context, Value};
//!
//! let root = Context::create();
//! let child = root.create_child()?;
//! root.set("count", Value::new(1_i64))?;
//!
//! let seen = Arc::new(AtomicI64::new(0));
//! let observer = seen.clone();
//! child.run_and_track(move |ctx| {
//!     observer.store(ctx.get_as::<i64>("count")?.unwrap_or(0), Ordering::SeqCst);
//!     Ok(true)
//! })?;
//!
//! root.set("count", Value::new(5_i64))?;
//! assert_eq!(seen.load(Ordering::SeqCst), 5);
//! # Ok::<(), strata_core::ContextError>(())
//! ```

pub mod collections;
pub mod config;
pub mod context;
pub mod error;
pub mod inject;
pub(crate) mod reactive;
pub mod value;

pub use collections::{NeutralValueMap, WeakRegistry};
pub use config::ContextConfig;
pub use context::{Context, ContextId};
pub use error::{ContextError, Result};
pub use inject::{Descriptor, Injector, Resolved};
pub use value::{Binding, ContextFunction, Object, Slot, Value};
