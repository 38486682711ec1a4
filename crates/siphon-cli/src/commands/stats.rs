use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use siphon_engine::config::{parser, validator};
use siphon_engine::{create_state_backend, StateStore};
use siphon_types::state::{StreamKind, StreamState};

/// Execute the `stats` command: print persisted per-stream statistics.
pub async fn execute(config_path: &Path, only_stream: Option<&str>, json: bool) -> Result<()> {
    let config = parser::parse_relay(config_path)
        .with_context(|| format!("Failed to parse relay config: {}", config_path.display()))?;
    validator::validate_relay(&config)?;

    let store = StateStore::new(create_state_backend(&config.state).await?);

    let names: Vec<&str> = match only_stream {
        Some(name) => {
            if !config.streams.iter().any(|s| s.name == name) {
                anyhow::bail!("No stream named '{name}' in config");
            }
            vec![name]
        }
        None => config.streams.iter().map(|s| s.name.as_str()).collect(),
    };

    if json {
        let mut out = serde_json::Map::new();
        for name in &names {
            let state = store.statistics(&StreamKind::new(*name)).await?;
            out.insert(
                (*name).to_string(),
                serde_json::to_value(state.unwrap_or_default())?,
            );
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for name in &names {
        match store.statistics(&StreamKind::new(*name)).await? {
            Some(state) => print_state(name, &state),
            None => println!("Stream '{name}': no persisted state"),
        }
    }
    Ok(())
}

fn print_state(name: &str, state: &StreamState) {
    println!("Stream '{name}':");
    println!("  Watermark:        {}", fmt_time(state.last_fetch_timestamp));
    println!("  Total sent:       {}", state.total_sent);
    println!("  Total duplicates: {}", state.total_duplicates);
    println!("  Total errors:     {}", state.total_errors);
    println!("  Last cycle sent:  {}", state.last_cycle_sent);
    println!("  Tracked keys:     {}", state.tracked_keys.len());
    println!(
        "  Pages fetched:    {} (max {} in one cycle)",
        state.total_pages_fetched, state.max_pages_in_single_fetch
    );
    println!("  Last success:     {}", fmt_time(state.last_success_timestamp));
    println!("  Last error:       {}", fmt_time(state.last_error_timestamp));
    if let Some(message) = &state.last_error_message {
        println!("  Last error msg:   {message}");
    }
    if let Some(warning) = &state.last_coverage_warning {
        println!("  Coverage warning: {warning}");
    }
}

fn fmt_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}
