use std::path::Path;

use anyhow::{Context, Result};

use siphon_engine::config::{parser, validator};
use siphon_engine::{create_state_backend, StateStore};
use siphon_types::state::StreamKind;

/// Execute the `reset` command: delete one stream's persisted state.
pub async fn execute(config_path: &Path, stream: &str, yes: bool) -> Result<()> {
    let config = parser::parse_relay(config_path)
        .with_context(|| format!("Failed to parse relay config: {}", config_path.display()))?;
    validator::validate_relay(&config)?;

    if !config.streams.iter().any(|s| s.name == stream) {
        anyhow::bail!("No stream named '{stream}' in config");
    }

    if !yes {
        anyhow::bail!(
            "Resetting '{stream}' re-fetches the full lookback window on the next cycle; \
             pass --yes to confirm"
        );
    }

    let store = StateStore::new(create_state_backend(&config.state).await?);
    store.reset(&StreamKind::new(stream)).await?;
    println!("Stream '{stream}' state reset.");
    Ok(())
}
