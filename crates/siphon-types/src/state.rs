//! Persisted cursor and statistics model.
//!
//! Pure data types shared by the state backends and the engine. One
//! [`StreamState`] blob is persisted per stream kind.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RecordId;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Logical category of data with its own cursor and fetch strategy
/// (e.g. `"hourly-snapshots"` vs `"people-counter"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKind(String);

impl StreamKind {
    /// Create a new stream kind.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for StreamKind {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// Persisted cursor and statistics for one stream.
///
/// `last_fetch_timestamp` is the watermark: the next fetch window starts
/// here. It advances only when a cycle did not hard-fail and never moves
/// backward. Counters are monotonic; `tracked_keys` is union-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamState {
    /// Watermark; the next fetch window starts here.
    pub last_fetch_timestamp: Option<DateTime<Utc>>,
    /// Last processed record id (informational).
    pub last_record_id: Option<RecordId>,
    pub total_sent: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub last_success_timestamp: Option<DateTime<Utc>>,
    pub last_error_timestamp: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    /// Distinct source keys ever seen.
    pub tracked_keys: BTreeSet<String>,
    /// Records forwarded by the most recent cycle.
    pub last_cycle_sent: u64,
    pub total_pages_fetched: u64,
    pub max_pages_in_single_fetch: u32,
    /// Most recent degraded-coverage diagnosis, cleared by a clean cycle.
    pub last_coverage_warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_display_and_as_str() {
        let kind = StreamKind::new("hourly-snapshots");
        assert_eq!(kind.as_str(), "hourly-snapshots");
        assert_eq!(kind.to_string(), "hourly-snapshots");
    }

    #[test]
    fn stream_kind_eq_and_hash() {
        use std::collections::HashSet;
        let a = StreamKind::new("s1");
        let b = StreamKind::from("s1");
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn stream_state_default_is_empty() {
        let state = StreamState::default();
        assert!(state.last_fetch_timestamp.is_none());
        assert_eq!(state.total_sent, 0);
        assert!(state.tracked_keys.is_empty());
        assert!(state.last_coverage_warning.is_none());
    }

    #[test]
    fn stream_state_serde_roundtrip() {
        let mut state = StreamState {
            last_fetch_timestamp: Some(Utc::now()),
            total_sent: 42,
            ..StreamState::default()
        };
        state.tracked_keys.insert("sensor-1".into());
        let json = serde_json::to_string(&state).unwrap();
        let back: StreamState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn stream_state_tolerates_missing_fields() {
        // Blobs written by older builds lack the pagination statistics.
        let json = r#"{"last_fetch_timestamp":"2026-01-15T10:00:00Z","total_sent":7}"#;
        let state: StreamState = serde_json::from_str(json).unwrap();
        assert_eq!(state.total_sent, 7);
        assert_eq!(state.total_pages_fetched, 0);
        assert!(state.last_fetch_timestamp.is_some());
    }
}
