//! Structured error model for relay operations.
//!
//! [`RelayError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via category-specific factory methods.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Broad classification of a relay error.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid relay configuration.
    Config,
    /// Credential exchange failure.
    Auth,
    /// Provider query failure (terminal, after retries).
    Fetch,
    /// Rate limit exceeded (retryable).
    RateLimit,
    /// Transient network error (retryable).
    TransientNetwork,
    /// A single record failed transformation or delivery.
    Record,
    /// Sink delivery failure.
    Sink,
    /// State persistence failure.
    State,
    /// Internal relay error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Fetch => "fetch",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::Record => "record",
            Self::Sink => "sink",
            Self::State => "state",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Fails the whole forward cycle.
    Cycle,
    /// Affects a single fan-out location; absorbed and counted.
    Location,
    /// Affects an individual record; absorbed and counted.
    Record,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cycle => "cycle",
            Self::Location => "location",
            Self::Record => "record",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a relay operation.
///
/// Carries classification, retry metadata, and optional diagnostic details.
/// Construct via category-specific factory methods (e.g. [`RelayError::auth`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct RelayError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RelayError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// Credential exchange error (not retryable).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// Terminal provider query error (not retryable).
    #[must_use]
    pub fn fetch(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Fetch, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// Rate limit error (retryable, slow backoff).
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCategory::RateLimit, ErrorScope::Cycle, true, BackoffClass::Slow, code, message,
        );
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient network error (retryable, normal backoff).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, ErrorScope::Cycle, true, BackoffClass::Normal, code, message)
    }

    /// Per-record error (not retryable, absorbed by the cycle).
    #[must_use]
    pub fn record(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Record, ErrorScope::Record, false, BackoffClass::Normal, code, message)
    }

    /// Sink delivery error (not retryable; delivery is not idempotent).
    #[must_use]
    pub fn sink(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Sink, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// State persistence error (not retryable).
    #[must_use]
    pub fn state(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::State, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// Internal relay error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Cycle, false, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// Compute retry delay for `attempt` (1-based).
    ///
    /// A provider-supplied `retry_after_ms` hint is used verbatim; otherwise
    /// exponential backoff from the backoff class, capped at 60 s.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if let Some(ms) = self.retry_after_ms {
            return Duration::from_millis(ms);
        }
        let base_ms: u64 = match self.backoff_class {
            BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
            BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
            BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
        };
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_defaults() {
        let err = RelayError::auth("CREDENTIAL_EXCHANGE", "login rejected");
        assert_eq!(err.category, ErrorCategory::Auth);
        assert_eq!(err.scope, ErrorScope::Cycle);
        assert!(!err.retryable);
        assert_eq!(err.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RelayError::transient_network("TIMEOUT", "timed out").retryable);
        assert!(RelayError::rate_limit("THROTTLED", "slow down", None).retryable);
    }

    #[test]
    fn record_error_scope_is_record() {
        let err = RelayError::record("BAD_TIMESTAMP", "no event time");
        assert_eq!(err.scope, ErrorScope::Record);
        assert!(!err.retryable);
    }

    #[test]
    fn backoff_normal_doubles() {
        let err = RelayError::transient_network("X", "y");
        assert_eq!(err.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(err.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(err.backoff_delay(3), Duration::from_millis(4_000));
    }

    #[test]
    fn backoff_slow_base() {
        let err = RelayError::rate_limit("X", "y", None);
        assert_eq!(err.backoff_delay(1), Duration::from_millis(5_000));
        assert_eq!(err.backoff_delay(2), Duration::from_millis(10_000));
    }

    #[test]
    fn backoff_respects_retry_after() {
        let err = RelayError::rate_limit("X", "y", Some(7_500));
        assert_eq!(err.backoff_delay(1), Duration::from_millis(7_500));
        assert_eq!(err.backoff_delay(5), Duration::from_millis(7_500));
    }

    #[test]
    fn backoff_capped_at_60s() {
        let err = RelayError::transient_network("X", "y");
        assert_eq!(err.backoff_delay(20), Duration::from_millis(60_000));
    }

    #[test]
    fn display_format() {
        let err = RelayError::sink("ENDPOINT_STATUS", "primary: HTTP 503");
        assert_eq!(err.to_string(), "[sink] ENDPOINT_STATUS: primary: HTTP 503");
    }

    #[test]
    fn serde_roundtrip() {
        let err = RelayError::rate_limit("THROTTLED", "slow down", Some(5_000))
            .with_details(serde_json::json!({"endpoint": "/v1/batch"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: RelayError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
