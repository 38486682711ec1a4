//! Cycle error model for cursor and retry decisions.

use siphon_types::error::RelayError;

// ---------------------------------------------------------------------------
// CycleError - categorised errors for cursor decisions
// ---------------------------------------------------------------------------

/// Categorized forward cycle error.
///
/// `Relay` wraps a typed [`RelayError`] with retry metadata (`retryable`,
/// `backoff_class`, `retry_after_ms`, etc.).
///
/// `Infrastructure` wraps opaque host-side errors (blocking task panics,
/// runtime plumbing) that are never retryable.
#[derive(Debug)]
pub enum CycleError {
    /// Typed relay error with retry metadata.
    Relay(RelayError),
    /// Infrastructure error (blocking task, runtime plumbing, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relay(e) => write!(f, "{}", e),
            Self::Infrastructure(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<anyhow::Error> for CycleError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<RelayError> for CycleError {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

impl CycleError {
    /// Returns `true` if this is a typed relay error marked as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Relay(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed relay error if this is a `Relay` variant.
    #[must_use]
    pub fn as_relay_error(&self) -> Option<&RelayError> {
        match self {
            Self::Relay(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::error::ErrorCategory;

    #[test]
    fn test_cycle_error_relay_is_retryable() {
        let err = CycleError::Relay(RelayError::transient_network(
            "CONN_RESET",
            "connection reset by peer",
        ));
        assert!(err.is_retryable());
        let re = err.as_relay_error().unwrap();
        assert_eq!(re.category, ErrorCategory::TransientNetwork);
    }

    #[test]
    fn test_cycle_error_relay_not_retryable() {
        let err = CycleError::Relay(RelayError::config("MISSING_URL", "base_url is required"));
        assert!(!err.is_retryable());
        let re = err.as_relay_error().unwrap();
        assert_eq!(re.category, ErrorCategory::Config);
    }

    #[test]
    fn test_cycle_error_infrastructure_not_retryable() {
        let err = CycleError::Infrastructure(anyhow::anyhow!("state task panicked"));
        assert!(!err.is_retryable());
        assert!(err.as_relay_error().is_none());
    }

    #[test]
    fn test_cycle_error_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let ce: CycleError = anyhow_err.into();
        assert!(matches!(ce, CycleError::Infrastructure(_)));
        assert!(!ce.is_retryable());
    }

    #[test]
    fn test_cycle_error_from_relay() {
        let ce: CycleError = RelayError::sink("ENDPOINT_FAILED", "mirror down").into();
        assert!(matches!(ce, CycleError::Relay(_)));
    }

    #[test]
    fn test_cycle_error_display_relay() {
        let err = CycleError::Relay(RelayError::rate_limit("TOO_MANY", "slow down", Some(5000)));
        let msg = format!("{}", err);
        assert!(msg.contains("rate_limit"));
        assert!(msg.contains("TOO_MANY"));
        assert!(msg.contains("slow down"));
    }

    #[test]
    fn test_cycle_error_display_infrastructure() {
        let err = CycleError::Infrastructure(anyhow::anyhow!("FileBackend::open failed"));
        let msg = format!("{}", err);
        assert!(msg.contains("FileBackend::open failed"));
    }
}
