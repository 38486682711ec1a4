//! Forward cycle outcome types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use siphon_types::record::RecordId;

/// Aggregate record counts for one forward cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Records delivered to the sinks.
    pub sent: u64,
    /// Records dropped by the duplicate filter.
    pub duplicates: u64,
    /// Absorbed failures: skipped locations, dropped records, failed
    /// endpoints under a lenient policy.
    pub errors: u64,
}

/// Everything a finished cycle folds into the persisted stream state.
///
/// Counters here are per-cycle deltas; [`apply_outcome`] adds them to the
/// stored totals. The watermark advances to `window_end` only when
/// `success` is set.
///
/// [`apply_outcome`]: crate::store::apply_outcome
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub success: bool,
    /// End of the fetched window; the new watermark on success.
    pub window_end: DateTime<Utc>,
    pub sent: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub pages_fetched: u32,
    /// Id of the last record handed to the sinks, if any.
    pub last_record_id: Option<RecordId>,
    /// Distinct source keys observed in this cycle.
    pub source_keys: BTreeSet<String>,
    pub error_message: Option<String>,
    /// Degraded-coverage diagnosis; `None` marks a clean cycle.
    pub coverage_warning: Option<String>,
}

impl CycleOutcome {
    /// Outcome for a cycle that failed before any records moved.
    pub(crate) fn failed(window_end: DateTime<Utc>, message: String) -> Self {
        Self {
            success: false,
            window_end,
            sent: 0,
            duplicates: 0,
            errors: 0,
            pages_fetched: 0,
            last_record_id: None,
            source_keys: BTreeSet::new(),
            error_message: Some(message),
            coverage_warning: None,
        }
    }

    /// Compact per-cycle counts.
    #[must_use]
    pub fn counts(&self) -> CycleResult {
        CycleResult {
            sent: self.sent,
            duplicates: self.duplicates,
            errors: self.errors,
        }
    }
}
