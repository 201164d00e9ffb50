//! Concurrent Collections
//!
//! The two storage primitives every context is built from:
//!
//! - [`NeutralValueMap`]: per-key atomic slot storage that tells "absent"
//!   from "present but null".
//! - [`WeakRegistry`]: weakly held listeners and children with iteration that
//!   tolerates concurrent modification and evicts dead entries lazily.

mod neutral_map;
mod weak_registry;

pub use neutral_map::NeutralValueMap;
pub use weak_registry::{Iter, WeakRegistry};
