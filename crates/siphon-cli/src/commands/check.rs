use std::path::Path;

use anyhow::{Context, Result};

use siphon_engine::config::{parser, validator};
use siphon_engine::resolve;
use siphon_provider::ProviderClient;

/// Execute the `check` command: validate config and probe external dependencies.
pub async fn execute(config_path: &Path) -> Result<()> {
    // 1. Parse relay YAML
    let config = parser::parse_relay(config_path)
        .with_context(|| format!("Failed to parse relay config: {}", config_path.display()))?;

    let mut failed = false;

    // 2. Structural validation
    match validator::validate_relay(&config) {
        Ok(()) => println!("Relay structure:   OK"),
        Err(e) => {
            println!("Relay structure:   FAILED");
            println!("    {e}");
            failed = true;
        }
    }

    // 3. Provider auth probe
    match ProviderClient::new(&config.provider) {
        Ok(client) => match client.bearer_token().await {
            Ok(_) => println!("Provider auth:     OK"),
            Err(e) => {
                println!("Provider auth:     FAILED");
                println!("    {e}");
                failed = true;
            }
        },
        Err(e) => {
            println!("Provider auth:     FAILED");
            println!("    {e}");
            failed = true;
        }
    }

    // 4. State backend round-trip
    if resolve::check_state_backend(&config.state).await {
        println!("State backend:     OK");
    } else {
        println!("State backend:     FAILED");
        failed = true;
    }

    // 5. Sink endpoints are listed, not called. A probe POST would deliver.
    let names: Vec<&str> = config
        .sinks
        .endpoints
        .iter()
        .map(|e| e.name.as_str())
        .collect();
    println!(
        "Sink endpoints:    {} configured ({})",
        names.len(),
        names.join(", ")
    );

    if failed {
        anyhow::bail!("One or more checks failed");
    }
    println!("\nAll checks passed.");
    Ok(())
}
