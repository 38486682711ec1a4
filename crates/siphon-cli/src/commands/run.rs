use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use siphon_engine::config::{parser, validator};
use siphon_engine::{create_state_backend, CycleResult, ForwardCycle, StateStore};
use siphon_provider::{ProviderClient, StreamFetcher};
use siphon_sink::FanoutForwarder;
use siphon_types::config::{RelayConfig, StreamConfig};
use siphon_types::sink::SinkForwarder;

/// Execute the `run` command: one forward cycle per configured stream.
pub async fn execute(config_path: &Path, only_stream: Option<&str>) -> Result<()> {
    // 1. Parse relay YAML
    let config = parser::parse_relay(config_path)
        .with_context(|| format!("Failed to parse relay config: {}", config_path.display()))?;

    // 2. Validate
    validator::validate_relay(&config)?;

    tracing::info!(
        provider = config.provider.base_url,
        streams = config.streams.len(),
        endpoints = config.sinks.endpoints.len(),
        "Relay validated"
    );

    let streams = select_streams(&config, only_stream)?;

    // 3. Wire up state, provider, and sinks
    let store = StateStore::new(create_state_backend(&config.state).await?);
    let client = Arc::new(ProviderClient::new(&config.provider)?);
    let forwarder = Arc::new(FanoutForwarder::new(&config.sinks));

    // 4. Run streams sequentially; one failure does not stop the rest
    let mut totals = CycleResult::default();
    let mut failures = 0usize;
    for stream in &streams {
        let fetcher = Arc::new(StreamFetcher::new(Arc::clone(&client), (*stream).clone()));
        let cycle = ForwardCycle::new(
            (*stream).clone(),
            fetcher,
            forwarder.clone(),
            store.clone(),
            config.cycle.clone(),
        );
        match cycle.run_cycle().await {
            Ok(result) => {
                totals.sent += result.sent;
                totals.duplicates += result.duplicates;
                totals.errors += result.errors;
                println!(
                    "Stream '{}': sent {}, duplicates {}, errors {}",
                    stream.name, result.sent, result.duplicates, result.errors
                );
            }
            Err(e) => {
                failures += 1;
                println!("Stream '{}': FAILED: {}", stream.name, e);
            }
        }
    }

    forwarder.close().await;

    println!("Relay run complete.");
    println!("  Streams run:   {}", streams.len());
    println!("  Records sent:  {}", totals.sent);
    println!("  Duplicates:    {}", totals.duplicates);
    println!("  Errors:        {}", totals.errors);

    if failures > 0 {
        anyhow::bail!("{failures}/{} stream(s) failed", streams.len());
    }
    Ok(())
}

fn select_streams<'a>(
    config: &'a RelayConfig,
    only: Option<&str>,
) -> Result<Vec<&'a StreamConfig>> {
    match only {
        Some(name) => {
            let stream = config
                .streams
                .iter()
                .find(|s| s.name == name)
                .with_context(|| format!("No stream named '{name}' in config"))?;
            Ok(vec![stream])
        }
        None => Ok(config.streams.iter().collect()),
    }
}
