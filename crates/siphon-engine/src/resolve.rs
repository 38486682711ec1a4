//! State backend resolution from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use siphon_state::{FileBackend, PostgresBackend, StateBackend};
use siphon_types::config::StateConfig;
use siphon_types::state::{StreamKind, StreamState};

/// Create the configured state backend.
///
/// The validator guarantees exactly one backend is configured; a config
/// that slips through with neither is rejected here as well.
///
/// # Errors
///
/// Returns an error when the backend cannot be opened.
pub async fn create_state_backend(config: &StateConfig) -> Result<Arc<dyn StateBackend>> {
    if let Some(connstr) = &config.postgres_url {
        let connstr = connstr.clone();
        let backend = tokio::task::spawn_blocking(move || PostgresBackend::connect(&connstr))
            .await
            .map_err(|e| anyhow::anyhow!("postgres connect task panicked: {e}"))?
            .map_err(|e| anyhow::anyhow!("failed to open postgres state backend: {e}"))?;
        info!(backend = "postgres", "State backend ready");
        return Ok(Arc::new(backend) as Arc<dyn StateBackend>);
    }
    if let Some(dir) = &config.dir {
        let backend = FileBackend::open(dir)
            .with_context(|| format!("Failed to open state directory: {}", dir.display()))?;
        info!(backend = "file", dir = %dir.display(), "State backend ready");
        return Ok(Arc::new(backend) as Arc<dyn StateBackend>);
    }
    anyhow::bail!("State config must set either dir or postgres_url")
}

/// Probe the configured state backend with a throwaway entry.
///
/// Exercises store, load, and delete so a read-only directory or a dead
/// connection fails the check rather than the first cycle.
pub async fn check_state_backend(config: &StateConfig) -> bool {
    let backend = match create_state_backend(config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("State backend: FAILED: {e:#}");
            return false;
        }
    };
    let probe = tokio::task::spawn_blocking(move || {
        let stream = StreamKind::new("check-probe");
        backend.store(&stream, &StreamState::default())?;
        backend.load(&stream)?;
        backend.delete(&stream)
    })
    .await;
    match probe {
        Ok(Ok(())) => {
            info!("State backend: OK");
            true
        }
        Ok(Err(e)) => {
            error!("State backend: FAILED: {e}");
            false
        }
        Err(e) => {
            error!("State backend: FAILED: {e}");
            false
        }
    }
}
