//! HTTP client for the remote provider.
//!
//! Wraps `reqwest` with credential handling and a retry loop driven by the
//! error classification in [`siphon_types::error`]. Idempotent reads (the
//! credential exchange and windowed queries) are retried on 429 and 5xx;
//! everything else fails fast.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use siphon_types::config::ProviderConfig;
use siphon_types::error::RelayError;
use tracing::{debug, info, warn};

use crate::token::{CachedToken, CredentialCache};

/// Applied when the provider omits `expires_in` from the token response.
const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

/// Reported TTLs above one year are clamped before the chrono conversion.
const MAX_TOKEN_TTL_SECS: u64 = 31_536_000;

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Authenticated provider connection shared by all stream fetchers.
pub struct ProviderClient {
    http: reqwest::Client,
    pub(crate) config: ProviderConfig,
    credentials: CredentialCache,
}

impl ProviderClient {
    /// Build a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the underlying HTTP client can't be
    /// constructed.
    pub fn new(config: &ProviderConfig) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("siphon-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::internal("HTTP_CLIENT", e.to_string()))?;

        Ok(Self {
            http,
            config: config.clone(),
            credentials: CredentialCache::new(config.token_cache_path.clone()),
        })
    }

    /// Return a valid bearer token, exchanging credentials if the cache
    /// has no usable one.
    ///
    /// # Errors
    ///
    /// Returns an auth-category [`RelayError`] when credential exchange
    /// fails after retries.
    pub async fn bearer_token(&self) -> Result<String, RelayError> {
        if let Some(token) = self.credentials.load_valid(Utc::now()) {
            return Ok(token.value);
        }

        let token = self.exchange_credentials().await?;
        if let Err(e) = self.credentials.store(&token) {
            warn!(error = %e, "failed to persist token cache, continuing with in-flight token");
        }
        Ok(token.value)
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn exchange_credentials(&self) -> Result<CachedToken, RelayError> {
        let url = self.config.effective_auth_url();
        let request = TokenRequest {
            username: &self.config.username,
            password: &self.config.password,
            api_key: &self.config.api_key,
        };

        // Retries happen inside send_with_retry; whatever escapes it is an
        // auth failure to the cycle, with the HTTP detail kept in the message.
        let response = self
            .send_with_retry("credential exchange", || {
                self.http.post(&url).json(&request)
            })
            .await
            .map_err(|e| RelayError::auth("CREDENTIAL_EXCHANGE", e.message))?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::auth("TOKEN_DECODE", e.to_string()))?;

        let ttl = body
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
            .min(MAX_TOKEN_TTL_SECS);
        let token = CachedToken {
            value: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl as i64),
        };
        info!(ttl_secs = ttl, "exchanged credentials for fresh token");
        Ok(token)
    }

    /// Issue an authenticated GET and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] on auth failure, terminal HTTP failure, or an
    /// undecodable body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, RelayError> {
        let bearer = self.bearer_token().await?;
        let response = self
            .send_with_retry(operation, || {
                self.http.get(url).bearer_auth(&bearer).query(query)
            })
            .await?;
        response
            .json()
            .await
            .map_err(|e| RelayError::fetch("PROVIDER_DECODE", format!("{operation}: {e}")))
    }

    /// Send a request, retrying retryable failures with backoff.
    ///
    /// `build` is invoked once per attempt since a `RequestBuilder` is
    /// consumed by `send`.
    pub(crate) async fn send_with_retry(
        &self,
        operation: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RelayError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let retry_after_ms = parse_retry_after(response.headers());
                    classify_status(operation, response.status(), retry_after_ms)
                }
                Err(e) => classify_transport(operation, &e),
            };

            if !error.retryable || attempt > self.config.max_retries {
                return Err(error);
            }
            let delay = error.backoff_delay(attempt);
            debug!(operation, attempt, ?delay, error = %error, "retrying provider request");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Map a non-success HTTP status to a classified error.
fn classify_status(
    operation: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
) -> RelayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RelayError::rate_limit(
            "PROVIDER_THROTTLED",
            format!("{operation}: HTTP 429"),
            retry_after_ms,
        );
    }
    if status.is_server_error() {
        return RelayError::transient_network(
            "PROVIDER_UNAVAILABLE",
            format!("{operation}: HTTP {status}"),
        );
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return RelayError::auth("PROVIDER_REJECTED", format!("{operation}: HTTP {status}"));
    }
    RelayError::fetch("PROVIDER_STATUS", format!("{operation}: HTTP {status}"))
}

/// Map a transport-level failure to a classified error.
fn classify_transport(operation: &str, error: &reqwest::Error) -> RelayError {
    if error.is_timeout() || error.is_connect() {
        RelayError::transient_network("PROVIDER_UNREACHABLE", format!("{operation}: {error}"))
    } else {
        RelayError::fetch("PROVIDER_TRANSPORT", format!("{operation}: {error}"))
    }
}

/// Parse a numeric `Retry-After` header into milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1_000))
}
