//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for per-stream cursors and
//! statistics. Model types live in [`siphon_types::state`].

use siphon_types::state::{StreamKind, StreamState};

use crate::error;

/// Storage contract for stream state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
/// All methods are synchronous; async callers wrap them in blocking tasks.
pub trait StateBackend: Send + Sync {
    /// Read the persisted state for a stream.
    ///
    /// Returns `Ok(None)` when no state has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn load(&self, stream: &StreamKind) -> error::Result<Option<StreamState>>;

    /// Upsert the state for a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn store(&self, stream: &StreamKind, state: &StreamState) -> error::Result<()>;

    /// Remove the persisted state for a stream. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete(&self, stream: &StreamKind) -> error::Result<()>;

    /// Human-readable backend kind for logs and diagnostics.
    fn kind(&self) -> &'static str;
}
