//! Forward cycle orchestration.
//!
//! One [`ForwardCycle`] per stream runs the fetch-dedup-forward loop:
//! compute the window from the persisted cursor, pull records through the
//! [`SourceFetcher`], drop duplicates, hand survivors to the
//! [`SinkForwarder`], and commit the outcome exactly once.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use siphon_types::config::{CycleConfig, StreamConfig};
use siphon_types::error::RelayError;
use siphon_types::sink::{DeliveryReport, EndpointResult, SinkForwarder};
use siphon_types::source::SourceFetcher;
use siphon_types::state::StreamKind;

use crate::dedup::DuplicateFilter;
use crate::errors::CycleError;
use crate::gaps::detect_gaps;
use crate::result::{CycleOutcome, CycleResult};
use crate::store::StateStore;

/// One stream's fetch-dedup-forward loop.
///
/// Owns the per-stream duplicate filter and serializes overlapping
/// invocations, so a scheduler re-firing while the previous cycle is still
/// running cannot interleave writes to the cursor.
pub struct ForwardCycle {
    stream: StreamConfig,
    kind: StreamKind,
    fetcher: Arc<dyn SourceFetcher>,
    forwarder: Arc<dyn SinkForwarder>,
    store: StateStore,
    settings: CycleConfig,
    filter: Mutex<DuplicateFilter>,
    flight: tokio::sync::Mutex<()>,
}

impl ForwardCycle {
    #[must_use]
    pub fn new(
        stream: StreamConfig,
        fetcher: Arc<dyn SourceFetcher>,
        forwarder: Arc<dyn SinkForwarder>,
        store: StateStore,
        settings: CycleConfig,
    ) -> Self {
        let kind = StreamKind::new(stream.name.clone());
        let filter = Mutex::new(DuplicateFilter::new(settings.dedup_capacity));
        Self {
            stream,
            kind,
            fetcher,
            forwarder,
            store,
            settings,
            filter,
            flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Stream this cycle serves.
    #[must_use]
    pub fn stream_kind(&self) -> &StreamKind {
        &self.kind
    }

    /// Run one complete cycle: window, fetch, dedup, forward, persist.
    ///
    /// The outcome is committed to the state store exactly once per
    /// invocation, on failure and deadline overrun too, so every cycle
    /// leaves an audit trail. The cursor advances only on success.
    ///
    /// # Errors
    ///
    /// Returns the cycle-fatal error after the failure has been recorded
    /// in the state store.
    pub async fn run_cycle(&self) -> Result<CycleResult, CycleError> {
        let _flight = self.flight.lock().await;

        let cursor = self.store.get_cursor(&self.kind).await;
        let to = Utc::now();
        let from = cursor
            .last_fetch_timestamp
            .unwrap_or_else(|| to - Duration::hours(i64::from(self.settings.lookback_hours)));

        let deadline = StdDuration::from_secs(self.settings.deadline_secs);
        let (outcome, cycle_error) =
            match tokio::time::timeout(deadline, self.execute(from, to)).await {
                Ok(result) => result,
                Err(_) => {
                    let deadline_error = RelayError::internal(
                        "CYCLE_DEADLINE",
                        format!("cycle exceeded its {}s budget", self.settings.deadline_secs),
                    );
                    let outcome = CycleOutcome::failed(to, deadline_error.to_string());
                    (outcome, Some(CycleError::Relay(deadline_error)))
                }
            };

        let commit = self.store.commit_outcome(&self.kind, &outcome).await;

        if let Some(error) = cycle_error {
            error!(stream = %self.kind, error = %error, "Cycle failed");
            if let Err(commit_error) = commit {
                error!(
                    stream = %self.kind,
                    error = %commit_error,
                    "State commit failed after cycle failure"
                );
            }
            return Err(error);
        }

        let state = commit?;
        if let Some(warning) = &outcome.coverage_warning {
            warn!(stream = %self.kind, warning = %warning, "Cycle completed with degraded coverage");
        }
        info!(
            stream = %self.kind,
            sent = outcome.sent,
            duplicates = outcome.duplicates,
            errors = outcome.errors,
            pages = outcome.pages_fetched,
            window_from = %from,
            window_to = %to,
            total_sent = state.total_sent,
            "Cycle complete"
        );
        Ok(outcome.counts())
    }

    /// Fetch, dedup, and forward one window.
    ///
    /// Cycle-fatal errors come back alongside a failure outcome carrying
    /// whatever counts accrued before the failure; the caller commits it.
    async fn execute(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (CycleOutcome, Option<CycleError>) {
        let report = match self.fetcher.fetch_window(from, to).await {
            Ok(report) => report,
            Err(e) => {
                let outcome = CycleOutcome::failed(to, e.to_string());
                return (outcome, Some(CycleError::Relay(e)));
            }
        };

        let mut fresh = Vec::with_capacity(report.records.len());
        let mut duplicates = 0u64;
        {
            // A poisoned filter only loses dedup history.
            let mut filter = match self.filter.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for record in report.records {
                if filter.is_duplicate(&record.id) {
                    duplicates += 1;
                } else {
                    fresh.push(record);
                }
            }
        }

        if let Some(interval) = self.stream.expected_interval_minutes {
            for gap in detect_gaps(&fresh, interval) {
                warn!(
                    stream = %self.kind,
                    source_key = %gap.source_key,
                    minutes = gap.minutes,
                    start = %gap.start,
                    end = %gap.end,
                    "Reporting gap detected"
                );
            }
        }

        let absorbed = u64::from(report.location_failures) + report.record_failures;
        let source_keys = fresh.iter().map(|r| r.source_key.clone()).collect();
        let last_record_id = fresh.last().map(|r| r.id.clone());

        let delivery = if fresh.is_empty() {
            DeliveryReport::default()
        } else {
            match self.forwarder.send_batch(&fresh).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    let mut outcome = CycleOutcome::failed(to, e.to_string());
                    outcome.duplicates = duplicates;
                    outcome.errors = absorbed;
                    outcome.pages_fetched = report.pages_fetched;
                    return (outcome, Some(CycleError::Relay(e)));
                }
            }
        };

        let failed_endpoints = delivery.failed_endpoints();
        let coverage_warning = compose_coverage_warning(
            report.degraded.as_deref(),
            report.location_failures,
            &failed_endpoints,
        );
        let errors =
            absorbed + delivery.records_failed + failed_endpoints.len() as u64;

        let outcome = CycleOutcome {
            success: true,
            window_end: to,
            sent: delivery.sent,
            duplicates,
            errors,
            pages_fetched: report.pages_fetched,
            last_record_id,
            source_keys,
            error_message: None,
            coverage_warning,
        };
        (outcome, None)
    }
}

/// Join the degraded-coverage signals of one cycle into a single warning.
fn compose_coverage_warning(
    degraded: Option<&str>,
    location_failures: u32,
    failed_endpoints: &[&EndpointResult],
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(note) = degraded {
        parts.push(note.to_string());
    }
    if location_failures == 1 {
        parts.push("1 location failed".to_string());
    } else if location_failures > 1 {
        parts.push(format!("{location_failures} locations failed"));
    }
    for endpoint in failed_endpoints {
        let detail = endpoint.error.as_deref().unwrap_or("delivery failed");
        parts.push(format!("endpoint {} failed: {detail}", endpoint.endpoint));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
