//! State backend error types.

use std::error::Error as StdError;

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying storage failure.
    #[error("state backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// State blob could not be serialized or deserialized.
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// File-system I/O failure (e.g. creating the state directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a storage error without extra context.
    pub fn backend<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend {
            context: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a storage error with an operation label.
    pub fn backend_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
