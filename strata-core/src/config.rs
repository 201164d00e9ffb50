//! Engine Configuration
//!
//! A [`ContextConfig`] is attached to a root context when it is created and
//! shared by every descendant created from it. It can be built in code or
//! loaded from a JSON document:
//!
//! ```rust
//! use strata_core::{Context, ContextConfig};
//!
//! let config = ContextConfig::from_json(r#"{ "recursion_limit": 16 }"#)?;
//! let root = Context::create_with_config(config)?;
//! assert_eq!(root.config().recursion_limit, 16);
//! # Ok::<(), strata_core::ContextError>(())
//! ```
//!
//! Missing fields take their default values.

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};

/// Tunables for a context tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Maximum number of nested computation frames on one thread.
    ///
    /// A value provider that reads another computed value opens a nested
    /// frame; chains deeper than this fail with
    /// [`ContextError::RecursionLimit`].
    pub recursion_limit: usize,

    /// Re-validate dependents against their observed values before re-running
    /// them.
    ///
    /// When disabled, every notification re-runs the affected trackers even
    /// if the values they read are unchanged.
    pub equality_short_circuit: bool,

    /// Emit a `trace` event for every lookup.
    pub trace_lookups: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 64,
            equality_short_circuit: true,
            trace_lookups: false,
        }
    }
}

impl ContextConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(ContextError::InvalidConfig(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
