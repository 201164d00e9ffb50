//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! is [`ContextError`]. User code running inside the engine (value providers
//! and trackers) reports its own failures through [`ContextError::Callback`],
//! which keeps the original error as its source.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ContextError> = std::result::Result<T, E>;

/// Errors raised by context operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// `modify` found no context declaring the key as modifiable.
    #[error("context variable `{key}` is not declared as modifiable")]
    AccessViolation { key: String },

    /// A mutation was attempted on a disposed context.
    #[error("context `{name}` has been disposed")]
    Disposed { name: String },

    /// A value provider read its own key while computing it.
    #[error("cycle detected while computing `{key}`")]
    Cycle { key: String },

    /// Computations nested deeper than the configured limit.
    #[error("computations nested deeper than {limit} levels")]
    RecursionLimit { limit: usize },

    /// The requested parent is the context itself or one of its descendants.
    #[error("a context cannot become a descendant of itself")]
    CyclicParent,

    /// A required injection key resolved to nothing.
    #[error("unable to inject `{target}`: no value bound to `{key}`")]
    Injection { target: String, key: String },

    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error raised by a value provider or a tracker callback.
    #[error(transparent)]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl ContextError {
    /// Wrap a user error raised inside a provider or tracker.
    pub fn callback<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Callback(error.into())
    }

    pub(crate) fn disposed(name: &str) -> Self {
        Self::Disposed {
            name: name.to_string(),
        }
    }
}
