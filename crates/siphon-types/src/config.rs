//! Relay configuration model.
//!
//! Deserialized from YAML after environment variable substitution. Structural
//! validation lives in the engine; these types only apply defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub provider: ProviderConfig,
    pub streams: Vec<StreamConfig>,
    pub sinks: SinkConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

/// Remote provider connection and credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for data queries.
    pub base_url: String,
    /// Credential exchange URL. Defaults to `{base_url}/login`.
    pub auth_url: Option<String>,
    pub username: String,
    pub password: String,
    pub api_key: String,
    /// Case-insensitive substring match against discovery entry owners.
    pub identity_filter: Option<String>,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_fanout_parallelism")]
    pub fanout_parallelism: usize,
}

/// One record stream pulled from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier, used as the state partition key.
    pub name: String,
    /// Provider-side record type of this stream.
    pub record_type: String,
    #[serde(default)]
    pub strategy: FetchStrategy,
    /// Discovery endpoint identifier (fan-out strategy).
    pub discovery_id: Option<String>,
    /// Coverage view identifier (fan-out strategy).
    pub coverage_id: Option<String>,
    /// Prefix stripped from discovered location labels.
    pub location_prefix: Option<String>,
    /// Extra query parameters forwarded verbatim to the provider.
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    /// Expected spacing between records, for gap detection.
    pub expected_interval_minutes: Option<u32>,
}

/// How a stream's records are pulled from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Two-phase discovery fan-out: enumerate locations, query each.
    #[default]
    FanOut,
    /// Single paginated query. Deprecated upstream; cycles report degraded
    /// coverage when used.
    Direct,
}

/// Delivery settings shared by all sink endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub endpoints: Vec<SinkEndpointConfig>,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub on_endpoint_failure: EndpointFailurePolicy,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Origin tag stamped on every forwarded envelope.
    #[serde(default = "default_origin")]
    pub origin: String,
}

/// A single sink endpoint. Every endpoint receives every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkEndpointConfig {
    pub name: String,
    pub url: String,
    pub auth_token: Option<String>,
}

/// What to do when a subset of endpoints fails delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFailurePolicy {
    /// Fail the cycle so the window is retried next run.
    #[default]
    FailCycle,
    /// Record a coverage warning and keep going.
    Continue,
}

/// Cursor persistence backend selection. Exactly one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for the local JSON file backend.
    pub dir: Option<PathBuf>,
    /// Connection string for the postgres backend.
    pub postgres_url: Option<String>,
}

/// Forward cycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Lookback for the first cycle of a fresh stream.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
    /// Wall-clock budget for a single cycle.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Duplicate filter capacity per stream.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from("./token_cache.json")
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_page_size() -> u32 {
    999
}
fn default_fanout_parallelism() -> usize {
    4
}
fn default_max_batch_size() -> usize {
    100
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_origin() -> String {
    "siphon-relay".to_string()
}
fn default_lookback_hours() -> u32 {
    24
}
fn default_deadline_secs() -> u64 {
    300
}
fn default_dedup_capacity() -> usize {
    1_000
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            deadline_secs: default_deadline_secs(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl ProviderConfig {
    /// Effective credential exchange URL.
    #[must_use]
    pub fn effective_auth_url(&self) -> String {
        match &self.auth_url {
            Some(url) => url.clone(),
            None => format!("{}/login", self.base_url.trim_end_matches('/')),
        }
    }
}
