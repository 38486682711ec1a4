//! Async wrapper over the synchronous state backends.
//!
//! State backends are blocking (file IO, postgres); every call goes through
//! `spawn_blocking`. [`apply_outcome`] is the single place a finished cycle
//! folds into persisted state, so cursor monotonicity lives here.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::error;

use siphon_state::{StateBackend, StateError};
use siphon_types::error::RelayError;
use siphon_types::state::{StreamKind, StreamState};

use crate::errors::CycleError;
use crate::result::CycleOutcome;

/// Shared handle to the configured state backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
}

impl StateStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Backend kind for logs and diagnostics.
    #[must_use]
    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Load the cursor for a stream, or a fresh default.
    ///
    /// Never fails: an unreadable blob is logged and treated as absent, so
    /// a corrupt state store degrades to a lookback re-fetch instead of
    /// wedging the stream.
    pub async fn get_cursor(&self, stream: &StreamKind) -> StreamState {
        let backend = Arc::clone(&self.backend);
        let key = stream.clone();
        let loaded = tokio::task::spawn_blocking(move || backend.load(&key)).await;
        match loaded {
            Ok(Ok(Some(state))) => state,
            Ok(Ok(None)) => StreamState::default(),
            Ok(Err(e)) => {
                error!(stream = %stream, error = %e, "State load failed, starting from defaults");
                StreamState::default()
            }
            Err(e) => {
                error!(stream = %stream, error = %e, "State load task panicked, starting from defaults");
                StreamState::default()
            }
        }
    }

    /// Fold a finished cycle into the persisted state for a stream.
    ///
    /// Loads the current blob, applies the outcome, and stores the result.
    /// Called exactly once per cycle, for failed cycles too.
    ///
    /// # Errors
    ///
    /// Returns a state error when the updated blob cannot be persisted.
    pub async fn commit_outcome(
        &self,
        stream: &StreamKind,
        outcome: &CycleOutcome,
    ) -> Result<StreamState, CycleError> {
        let backend = Arc::clone(&self.backend);
        let stream = stream.clone();
        let outcome = outcome.clone();
        let updated = tokio::task::spawn_blocking(move || {
            let mut state = backend.load(&stream)?.unwrap_or_default();
            apply_outcome(&mut state, &outcome, Utc::now());
            backend.store(&stream, &state)?;
            Ok::<_, StateError>(state)
        })
        .await
        .map_err(|e| CycleError::Infrastructure(anyhow!("state commit task panicked: {e}")))?
        .map_err(|e| RelayError::state("STATE_COMMIT", e.to_string()))?;
        Ok(updated)
    }

    /// Read the persisted state for a stream without defaulting.
    ///
    /// # Errors
    ///
    /// Returns a state error when the backend cannot be read.
    pub async fn statistics(
        &self,
        stream: &StreamKind,
    ) -> Result<Option<StreamState>, CycleError> {
        let backend = Arc::clone(&self.backend);
        let stream = stream.clone();
        let loaded = tokio::task::spawn_blocking(move || backend.load(&stream))
            .await
            .map_err(|e| CycleError::Infrastructure(anyhow!("state load task panicked: {e}")))?
            .map_err(|e| RelayError::state("STATE_LOAD", e.to_string()))?;
        Ok(loaded)
    }

    /// Drop the persisted state for a stream. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a state error when the backend cannot delete the blob.
    pub async fn reset(&self, stream: &StreamKind) -> Result<(), CycleError> {
        let backend = Arc::clone(&self.backend);
        let stream = stream.clone();
        tokio::task::spawn_blocking(move || backend.delete(&stream))
            .await
            .map_err(|e| CycleError::Infrastructure(anyhow!("state delete task panicked: {e}")))?
            .map_err(|e| RelayError::state("STATE_DELETE", e.to_string()))?;
        Ok(())
    }
}

/// Fold one cycle outcome into a stream's persisted state.
///
/// Counter fields accumulate; `tracked_keys` is union-only. The watermark
/// advances to `window_end` only on success and never moves backward.
/// `last_error_message` is sticky across later successes so operators can
/// see the most recent failure; `last_coverage_warning` is cleared by the
/// next clean cycle.
pub fn apply_outcome(state: &mut StreamState, outcome: &CycleOutcome, now: DateTime<Utc>) {
    state.total_sent += outcome.sent;
    state.total_duplicates += outcome.duplicates;
    state.total_errors += outcome.errors;
    state.last_cycle_sent = outcome.sent;
    state.total_pages_fetched += u64::from(outcome.pages_fetched);
    state.max_pages_in_single_fetch = state.max_pages_in_single_fetch.max(outcome.pages_fetched);
    state
        .tracked_keys
        .extend(outcome.source_keys.iter().cloned());
    if let Some(id) = &outcome.last_record_id {
        state.last_record_id = Some(id.clone());
    }

    if outcome.success {
        state.last_success_timestamp = Some(now);
        state.last_fetch_timestamp = Some(match state.last_fetch_timestamp {
            Some(current) => current.max(outcome.window_end),
            None => outcome.window_end,
        });
        state.last_coverage_warning = outcome.coverage_warning.clone();
    } else {
        state.last_error_timestamp = Some(now);
        if let Some(message) = &outcome.error_message {
            state.last_error_message = Some(message.clone());
        }
    }
}
