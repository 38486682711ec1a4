//! Semantic validation for parsed relay configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use siphon_types::config::{
    FetchStrategy, ProviderConfig, RelayConfig, SinkConfig, StateConfig, StreamConfig,
};

/// Largest page the provider serves in one response.
const MAX_PAGE_SIZE: u32 = 999;

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Stream and endpoint names double as state keys and log fields.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_provider(provider: &ProviderConfig, errors: &mut Vec<String>) {
    if !is_http_url(&provider.base_url) {
        errors.push(format!(
            "provider.base_url must be an http(s) URL, got '{}'",
            provider.base_url
        ));
    }
    if provider.username.trim().is_empty() {
        errors.push("provider.username must not be empty".to_string());
    }
    if provider.password.is_empty() {
        errors.push("provider.password must not be empty".to_string());
    }
    if provider.api_key.is_empty() {
        errors.push("provider.api_key must not be empty".to_string());
    }
    if provider.page_size == 0 || provider.page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "provider.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            provider.page_size
        ));
    }
    if provider.request_timeout_secs == 0 {
        errors.push("provider.request_timeout_secs must be at least 1".to_string());
    }
    if provider.fanout_parallelism == 0 {
        errors.push("provider.fanout_parallelism must be at least 1".to_string());
    }
}

fn validate_stream(index: usize, stream: &StreamConfig, errors: &mut Vec<String>) {
    if stream.name.trim().is_empty() {
        errors.push(format!("Stream {index} has an empty name"));
    } else if !is_identifier(&stream.name) {
        errors.push(format!(
            "Stream '{}' name must contain only alphanumerics, '-' or '_'",
            stream.name
        ));
    }
    if stream.record_type.trim().is_empty() {
        errors.push(format!("Stream '{}' has an empty record_type", stream.name));
    }
    match stream.strategy {
        FetchStrategy::FanOut => {
            if stream.discovery_id.is_none() {
                errors.push(format!(
                    "Stream '{}' uses fan_out but has no discovery_id",
                    stream.name
                ));
            }
            if stream.coverage_id.is_none() {
                errors.push(format!(
                    "Stream '{}' uses fan_out but has no coverage_id",
                    stream.name
                ));
            }
        }
        FetchStrategy::Direct => {
            if stream.coverage_id.is_none() {
                errors.push(format!(
                    "Stream '{}' uses direct fetch but has no coverage_id",
                    stream.name
                ));
            }
        }
    }
    if stream.expected_interval_minutes == Some(0) {
        errors.push(format!(
            "Stream '{}' expected_interval_minutes must be at least 1",
            stream.name
        ));
    }
}

fn validate_sinks(sinks: &SinkConfig, errors: &mut Vec<String>) {
    if sinks.endpoints.is_empty() {
        errors.push("Sinks must define at least one endpoint".to_string());
    }
    let mut seen = HashSet::new();
    for (i, endpoint) in sinks.endpoints.iter().enumerate() {
        if endpoint.name.trim().is_empty() {
            errors.push(format!("Sink endpoint {i} has an empty name"));
        } else if !seen.insert(endpoint.name.as_str()) {
            errors.push(format!("Duplicate sink endpoint name '{}'", endpoint.name));
        }
        if !is_http_url(&endpoint.url) {
            errors.push(format!(
                "Sink endpoint '{}' url must be an http(s) URL, got '{}'",
                endpoint.name, endpoint.url
            ));
        }
    }
    if sinks.max_batch_size == 0 {
        errors.push("sinks.max_batch_size must be at least 1".to_string());
    }
    if sinks.send_timeout_secs == 0 {
        errors.push("sinks.send_timeout_secs must be at least 1".to_string());
    }
    if sinks.origin.trim().is_empty() {
        errors.push("sinks.origin must not be empty".to_string());
    }
}

fn validate_state(state: &StateConfig, errors: &mut Vec<String>) {
    match (&state.dir, &state.postgres_url) {
        (None, None) => {
            errors.push("State must set either dir or postgres_url".to_string());
        }
        (Some(_), Some(_)) => {
            errors.push("State must set only one of dir and postgres_url".to_string());
        }
        _ => {}
    }
}

/// Validate a parsed relay configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the relay config.
pub fn validate_relay(config: &RelayConfig) -> Result<()> {
    let mut errors = Vec::new();

    validate_provider(&config.provider, &mut errors);

    if config.streams.is_empty() {
        errors.push("Relay must define at least one stream".to_string());
    }
    let mut seen = HashSet::new();
    for (i, stream) in config.streams.iter().enumerate() {
        if !stream.name.trim().is_empty() && !seen.insert(stream.name.as_str()) {
            errors.push(format!("Duplicate stream name '{}'", stream.name));
        }
        validate_stream(i, stream, &mut errors);
    }

    validate_sinks(&config.sinks, &mut errors);
    validate_state(&config.state, &mut errors);

    if config.cycle.lookback_hours == 0 {
        errors.push("cycle.lookback_hours must be at least 1".to_string());
    }
    if config.cycle.deadline_secs == 0 {
        errors.push("cycle.deadline_secs must be at least 1".to_string());
    }
    if config.cycle.dedup_capacity == 0 {
        errors.push("cycle.dedup_capacity must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Relay validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_relay_str;

    fn valid_yaml() -> &'static str {
        r#"
provider:
  base_url: https://api.example.com/v2
  username: relay
  password: secret
  api_key: k-123
streams:
  - name: readings
    record_type: reading
    discovery_id: disc-1
    coverage_id: cov-1
sinks:
  endpoints:
    - name: primary
      url: https://sink.example.com/ingest
state:
  dir: ./state
"#
    }

    #[test]
    fn test_valid_relay_passes() {
        let config = parse_relay_str(valid_yaml()).unwrap();
        assert!(validate_relay(&config).is_ok());
    }

    #[test]
    fn test_non_http_base_url_fails() {
        let yaml = valid_yaml().replace("https://api.example.com/v2", "ftp://api.example.com");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("base_url"));
    }

    #[test]
    fn test_empty_username_fails() {
        let yaml = valid_yaml().replace("username: relay", "username: \"\"");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("username"));
    }

    #[test]
    fn test_page_size_zero_fails() {
        let yaml = valid_yaml().replace("api_key: k-123", "api_key: k-123\n  page_size: 0");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("page_size"));
    }

    #[test]
    fn test_page_size_over_limit_fails() {
        let yaml = valid_yaml().replace("api_key: k-123", "api_key: k-123\n  page_size: 1000");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("page_size"));
    }

    #[test]
    fn test_no_streams_fails() {
        let yaml = r#"
provider:
  base_url: https://api.example.com/v2
  username: relay
  password: secret
  api_key: k-123
streams: []
sinks:
  endpoints:
    - name: primary
      url: https://sink.example.com/ingest
state:
  dir: ./state
"#;
        let config = parse_relay_str(yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("at least one stream"));
    }

    #[test]
    fn test_duplicate_stream_names_fail() {
        let yaml = valid_yaml().replace(
            "    coverage_id: cov-1",
            "    coverage_id: cov-1\n  - name: readings\n    record_type: reading\n    discovery_id: disc-2\n    coverage_id: cov-2",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("Duplicate stream name"));
    }

    #[test]
    fn test_stream_name_with_spaces_fails() {
        let yaml = valid_yaml().replace("name: readings", "name: \"hourly readings\"");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("alphanumerics"));
    }

    #[test]
    fn test_fan_out_without_discovery_id_fails() {
        let yaml = valid_yaml().replace("    discovery_id: disc-1\n", "");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("no discovery_id"));
    }

    #[test]
    fn test_direct_without_coverage_id_fails() {
        let yaml = r#"
provider:
  base_url: https://api.example.com/v2
  username: relay
  password: secret
  api_key: k-123
streams:
  - name: alerts
    record_type: alert
    strategy: direct
sinks:
  endpoints:
    - name: primary
      url: https://sink.example.com/ingest
state:
  dir: ./state
"#;
        let config = parse_relay_str(yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("direct fetch but has no coverage_id"));
    }

    #[test]
    fn test_direct_with_coverage_id_passes() {
        let yaml = valid_yaml().replace(
            "    record_type: reading",
            "    record_type: reading\n    strategy: direct",
        );
        let config = parse_relay_str(&yaml).unwrap();
        assert!(validate_relay(&config).is_ok());
    }

    #[test]
    fn test_zero_interval_fails() {
        let yaml = valid_yaml().replace(
            "    coverage_id: cov-1",
            "    coverage_id: cov-1\n    expected_interval_minutes: 0",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("expected_interval_minutes"));
    }

    #[test]
    fn test_no_endpoints_fails() {
        let yaml = valid_yaml().replace(
            "  endpoints:\n    - name: primary\n      url: https://sink.example.com/ingest",
            "  endpoints: []",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("at least one endpoint"));
    }

    #[test]
    fn test_duplicate_endpoint_names_fail() {
        let yaml = valid_yaml().replace(
            "      url: https://sink.example.com/ingest",
            "      url: https://sink.example.com/ingest\n    - name: primary\n      url: https://sink-b.example.com/ingest",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("Duplicate sink endpoint name"));
    }

    #[test]
    fn test_non_http_endpoint_url_fails() {
        let yaml = valid_yaml().replace("https://sink.example.com/ingest", "sink.example.com");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("http(s) URL"));
    }

    #[test]
    fn test_zero_batch_size_fails() {
        let yaml = valid_yaml().replace(
            "state:",
            "  max_batch_size: 0\nstate:",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("max_batch_size"));
    }

    #[test]
    fn test_state_with_no_backend_fails() {
        let yaml = valid_yaml().replace("state:\n  dir: ./state", "state: {}");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("either dir or postgres_url"));
    }

    #[test]
    fn test_state_with_both_backends_fails() {
        let yaml = valid_yaml().replace(
            "  dir: ./state",
            "  dir: ./state\n  postgres_url: postgres://relay@db/relay",
        );
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("only one of dir and postgres_url"));
    }

    #[test]
    fn test_zero_deadline_fails() {
        let yaml = format!("{}\ncycle:\n  deadline_secs: 0\n", valid_yaml().trim_end());
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("deadline_secs"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = valid_yaml()
            .replace("username: relay", "username: \"\"")
            .replace("password: secret", "password: \"\"");
        let config = parse_relay_str(&yaml).unwrap();
        let err = validate_relay(&config).unwrap_err().to_string();
        assert!(err.contains("username"));
        assert!(err.contains("password"));
    }
}
