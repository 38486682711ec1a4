//! A single HTTP ingestion endpoint.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use siphon_types::config::SinkEndpointConfig;
use siphon_types::error::RelayError;
use tracing::debug;

use crate::forwarder::BatchTransport;

/// One configured delivery target with a lazily built, reused HTTP client.
pub struct HttpEndpoint {
    name: String,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpEndpoint {
    #[must_use]
    pub fn new(config: &SinkEndpointConfig, timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Connection is established on first use and reused until [`close`].
    ///
    /// [`close`]: BatchTransport::close
    fn client(&self) -> Result<reqwest::Client, RelayError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| RelayError::sink("SINK_CLIENT_LOCK", "endpoint client lock poisoned"))?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("siphon-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::sink("SINK_CLIENT", e.to_string()))?;
        debug!(endpoint = %self.name, url = %self.url, "sink connection established");
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl BatchTransport for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    /// POST one batch as a JSON array. Not retried: delivery is not
    /// idempotent.
    async fn post_batch(&self, batch: &[Value]) -> Result<(), RelayError> {
        let client = self.client()?;
        let mut request = client.post(&self.url).json(batch);
        if let Some(token) = self.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::sink("SINK_TRANSPORT", format!("{}: {e}", self.name)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::sink(
                "SINK_STATUS",
                format!(
                    "{}: HTTP {status}: {}",
                    self.name,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.client.lock() {
            *guard = None;
        }
    }
}
