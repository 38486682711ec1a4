//! Integration tests for the forward cycle.
//!
//! A scripted fetcher and a recording forwarder stand in for the provider
//! and sink crates; everything from window computation through dedup and
//! cursor persistence runs for real against a temp-dir file backend.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;

use siphon_engine::{ForwardCycle, StateStore};
use siphon_state::FileBackend;
use siphon_types::config::{CycleConfig, FetchStrategy, StreamConfig};
use siphon_types::error::RelayError;
use siphon_types::record::{Record, RecordId};
use siphon_types::sink::{DeliveryReport, EndpointResult, SinkForwarder};
use siphon_types::source::{FetchReport, SourceFetcher};
use siphon_types::state::StreamKind;

/// Replays a scripted sequence of fetch outcomes and records the windows
/// it was asked for. Past the end of the script every window is empty.
struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchReport, RelayError>>>,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl ScriptedFetcher {
    fn new(script: Vec<Result<FetchReport, RelayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            windows: Mutex::new(Vec::new()),
        })
    }

    fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<FetchReport, RelayError> {
        self.windows.lock().unwrap().push((from, to));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchReport::default()))
    }
}

/// A fetcher that never completes, for deadline tests.
struct PendingFetcher;

#[async_trait]
impl SourceFetcher for PendingFetcher {
    async fn fetch_window(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<FetchReport, RelayError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Accepts or rejects batches and logs the record ids handed to it.
struct RecordingForwarder {
    batches: Mutex<Vec<Vec<RecordId>>>,
    fail: Option<RelayError>,
    degraded_endpoint: Option<EndpointResult>,
}

impl RecordingForwarder {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            fail: None,
            degraded_endpoint: None,
        })
    }

    fn failing(error: RelayError) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            fail: Some(error),
            degraded_endpoint: None,
        })
    }

    fn with_failed_endpoint(result: EndpointResult) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            fail: None,
            degraded_endpoint: Some(result),
        })
    }

    fn batches(&self) -> Vec<Vec<RecordId>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SinkForwarder for RecordingForwarder {
    async fn send_batch(&self, records: &[Record]) -> Result<DeliveryReport, RelayError> {
        if let Some(error) = &self.fail {
            return Err(error.clone());
        }
        self.batches
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.id.clone()).collect());
        let mut report = DeliveryReport {
            sent: records.len() as u64,
            records_failed: 0,
            endpoint_results: vec![EndpointResult {
                endpoint: "primary".to_string(),
                batches_delivered: 1,
                error: None,
            }],
        };
        if let Some(failed) = &self.degraded_endpoint {
            report.endpoint_results.push(failed.clone());
        }
        Ok(report)
    }

    async fn close(&self) {}
}

fn record(n: u32, key: &str) -> Record {
    Record {
        id: RecordId::new(format!("rec-{n}")),
        timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        source_key: key.to_string(),
        location_tags: vec![key.to_string()],
        payload: serde_json::Map::new(),
    }
}

fn report_with(records: Vec<Record>) -> FetchReport {
    FetchReport {
        records,
        pages_fetched: 1,
        ..FetchReport::default()
    }
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        name: "readings".to_string(),
        record_type: "reading".to_string(),
        strategy: FetchStrategy::FanOut,
        discovery_id: Some("disc-1".to_string()),
        coverage_id: Some("cov-1".to_string()),
        location_prefix: None,
        query_params: BTreeMap::new(),
        expected_interval_minutes: None,
    }
}

fn store_in(dir: &std::path::Path) -> StateStore {
    StateStore::new(Arc::new(FileBackend::open(dir).unwrap()))
}

#[tokio::test]
async fn first_cycle_uses_the_default_lookback() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(vec![]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher.clone(),
        forwarder,
        store_in(dir.path()),
        CycleConfig::default(),
    );

    let result = cycle.run_cycle().await.unwrap();
    assert_eq!(result.sent, 0);

    let windows = fetcher.windows();
    assert_eq!(windows.len(), 1);
    let (from, to) = windows[0];
    assert_eq!((to - from).num_hours(), 24);
}

#[tokio::test]
async fn idempotent_cursor_advance_with_no_new_data() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let fetcher = ScriptedFetcher::new(vec![Ok(report_with(vec![
        record(1, "sensor-a"),
        record(2, "sensor-a"),
        record(3, "sensor-b"),
    ]))]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher.clone(),
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );
    let kind = StreamKind::new("readings");

    let first = cycle.run_cycle().await.unwrap();
    assert_eq!(first.sent, 3);
    let after_first = store.statistics(&kind).await.unwrap().unwrap();
    let watermark_first = after_first.last_fetch_timestamp.unwrap();

    // Second cycle finds nothing; the cursor must still advance.
    let second = cycle.run_cycle().await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.duplicates, 0);
    assert_eq!(second.errors, 0);

    let after_second = store.statistics(&kind).await.unwrap().unwrap();
    assert_eq!(after_second.total_sent, 3);
    assert!(after_second.last_fetch_timestamp.unwrap() >= watermark_first);

    // The second window starts exactly where the first ended.
    let windows = fetcher.windows();
    assert_eq!(windows[1].0, windows[0].1);
}

#[tokio::test]
async fn duplicate_records_are_suppressed_not_resent() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let batch = vec![record(1, "sensor-a"), record(2, "sensor-a"), record(3, "sensor-b")];
    let fetcher = ScriptedFetcher::new(vec![
        Ok(report_with(batch.clone())),
        Ok(report_with(batch)),
    ]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder.clone(),
        store.clone(),
        CycleConfig::default(),
    );

    let first = cycle.run_cycle().await.unwrap();
    assert_eq!(first.sent, 3);
    assert_eq!(first.duplicates, 0);

    let second = cycle.run_cycle().await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.duplicates, 3);

    // Only the first cycle reached the forwarder.
    assert_eq!(forwarder.batches().len(), 1);

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.total_sent, 3);
    assert_eq!(state.total_duplicates, 3);
}

#[tokio::test]
async fn partial_fan_out_failure_still_forwards() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let mut report = report_with(vec![record(1, "site-b"), record(2, "site-b")]);
    report.location_failures = 1;
    let fetcher = ScriptedFetcher::new(vec![Ok(report)]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder.clone(),
        store.clone(),
        CycleConfig::default(),
    );

    let result = cycle.run_cycle().await.unwrap();
    assert_eq!(result.sent, 2);
    assert_eq!(result.errors, 1);
    assert_eq!(forwarder.batches().len(), 1);

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.total_errors, 1);
    assert_eq!(
        state.last_coverage_warning.as_deref(),
        Some("1 location failed")
    );
}

#[tokio::test]
async fn cursor_is_monotonic_across_a_failed_cycle() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let fetcher = ScriptedFetcher::new(vec![
        Ok(report_with(vec![record(1, "sensor-a")])),
        Err(RelayError::fetch("PROVIDER_STATUS", "HTTP 500")),
        Ok(FetchReport::default()),
    ]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );
    let kind = StreamKind::new("readings");

    cycle.run_cycle().await.unwrap();
    let w1 = store
        .statistics(&kind)
        .await
        .unwrap()
        .unwrap()
        .last_fetch_timestamp
        .unwrap();

    let failed = cycle.run_cycle().await;
    assert!(failed.is_err());
    let after_failure = store.statistics(&kind).await.unwrap().unwrap();
    assert_eq!(after_failure.last_fetch_timestamp, Some(w1));
    assert!(after_failure
        .last_error_message
        .as_deref()
        .unwrap()
        .contains("PROVIDER_STATUS"));
    assert!(after_failure.last_error_timestamp.is_some());

    cycle.run_cycle().await.unwrap();
    let w3 = store
        .statistics(&kind)
        .await
        .unwrap()
        .unwrap()
        .last_fetch_timestamp
        .unwrap();
    assert!(w3 >= w1);
}

#[tokio::test]
async fn failed_delivery_fails_the_cycle_and_keeps_the_cursor() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let fetcher = ScriptedFetcher::new(vec![Ok(report_with(vec![record(1, "sensor-a")]))]);
    let forwarder = RecordingForwarder::failing(RelayError::sink(
        "ALL_ENDPOINTS_FAILED",
        "delivery failed on all 2 endpoints",
    ));
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );

    let result = cycle.run_cycle().await;
    assert!(result.is_err());

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert!(state.last_fetch_timestamp.is_none());
    assert!(state
        .last_error_message
        .as_deref()
        .unwrap()
        .contains("ALL_ENDPOINTS_FAILED"));
    assert_eq!(state.total_sent, 0);
}

#[tokio::test]
async fn lenient_endpoint_failure_becomes_a_coverage_warning() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let fetcher = ScriptedFetcher::new(vec![Ok(report_with(vec![record(1, "sensor-a")]))]);
    let forwarder = RecordingForwarder::with_failed_endpoint(EndpointResult {
        endpoint: "mirror".to_string(),
        batches_delivered: 0,
        error: Some("HTTP 503".to_string()),
    });
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );

    let result = cycle.run_cycle().await.unwrap();
    assert_eq!(result.sent, 1);
    assert_eq!(result.errors, 1);

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    let warning = state.last_coverage_warning.unwrap();
    assert!(warning.contains("endpoint mirror failed: HTTP 503"));
    assert!(state.last_fetch_timestamp.is_some());
}

#[tokio::test]
async fn degraded_fetch_warning_is_persisted_then_cleared() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let mut degraded = report_with(vec![record(1, "sensor-a")]);
    degraded.degraded = Some("direct fetch strategy in use".to_string());
    let fetcher = ScriptedFetcher::new(vec![Ok(degraded)]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );
    let kind = StreamKind::new("readings");

    cycle.run_cycle().await.unwrap();
    let warned = store.statistics(&kind).await.unwrap().unwrap();
    assert!(warned
        .last_coverage_warning
        .as_deref()
        .unwrap()
        .contains("direct fetch strategy"));

    // Next clean cycle clears the warning.
    cycle.run_cycle().await.unwrap();
    let clean = store.statistics(&kind).await.unwrap().unwrap();
    assert!(clean.last_coverage_warning.is_none());
}

#[tokio::test]
async fn full_window_forwards_every_record_once() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let records: Vec<Record> = (0..2000).map(|n| record(n, "site-a")).collect();
    let mut report = report_with(records);
    report.pages_fetched = 3;
    let fetcher = ScriptedFetcher::new(vec![Ok(report)]);
    let forwarder = RecordingForwarder::accepting();
    let settings = CycleConfig {
        dedup_capacity: 5_000,
        ..CycleConfig::default()
    };
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder.clone(),
        store.clone(),
        settings,
    );

    let result = cycle.run_cycle().await.unwrap();
    assert_eq!(result.sent, 2000);
    assert_eq!(result.duplicates, 0);
    assert_eq!(result.errors, 0);
    assert_eq!(forwarder.batches()[0].len(), 2000);

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert!(state.last_fetch_timestamp.is_some());
    assert_eq!(state.total_pages_fetched, 3);
    assert_eq!(state.max_pages_in_single_fetch, 3);
    assert_eq!(state.last_cycle_sent, 2000);
}

#[tokio::test]
async fn resume_picks_up_where_the_previous_instance_stopped() {
    let dir = tempdir().unwrap();
    let kind = StreamKind::new("readings");

    // First instance forwards two records, then goes away.
    let fetcher_a = ScriptedFetcher::new(vec![Ok(report_with(vec![
        record(1, "sensor-a"),
        record(2, "sensor-a"),
    ]))]);
    let forwarder_a = RecordingForwarder::accepting();
    let cycle_a = ForwardCycle::new(
        stream_config(),
        fetcher_a.clone(),
        forwarder_a,
        store_in(dir.path()),
        CycleConfig::default(),
    );
    cycle_a.run_cycle().await.unwrap();
    drop(cycle_a);

    // A fresh instance with an empty dedup filter resumes from the cursor.
    let fetcher_b = ScriptedFetcher::new(vec![Ok(report_with(vec![record(3, "sensor-a")]))]);
    let forwarder_b = RecordingForwarder::accepting();
    let store_b = store_in(dir.path());
    let cycle_b = ForwardCycle::new(
        stream_config(),
        fetcher_b.clone(),
        forwarder_b,
        store_b.clone(),
        CycleConfig::default(),
    );
    let result = cycle_b.run_cycle().await.unwrap();
    assert_eq!(result.sent, 1);

    assert_eq!(fetcher_b.windows()[0].0, fetcher_a.windows()[0].1);

    let state = store_b.statistics(&kind).await.unwrap().unwrap();
    assert_eq!(state.total_sent, 3);
}

#[tokio::test]
async fn deadline_overrun_still_persists_the_failure() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let forwarder = RecordingForwarder::accepting();
    let settings = CycleConfig {
        deadline_secs: 1,
        ..CycleConfig::default()
    };
    let cycle = ForwardCycle::new(
        stream_config(),
        Arc::new(PendingFetcher),
        forwarder,
        store.clone(),
        settings,
    );

    let result = cycle.run_cycle().await;
    assert!(result.is_err());

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert!(state
        .last_error_message
        .as_deref()
        .unwrap()
        .contains("CYCLE_DEADLINE"));
    assert!(state.last_fetch_timestamp.is_none());
}

#[tokio::test]
async fn future_watermark_still_fetches_and_never_moves_backward() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let kind = StreamKind::new("readings");

    // A skewed clock on a previous host left the watermark in the future.
    let future = Utc::now() + chrono::Duration::hours(1);
    let backend = FileBackend::open(dir.path()).unwrap();
    let seeded = siphon_types::state::StreamState {
        last_fetch_timestamp: Some(future),
        ..Default::default()
    };
    siphon_state::StateBackend::store(&backend, &kind, &seeded).unwrap();

    let fetcher = ScriptedFetcher::new(vec![]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher.clone(),
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );

    let result = cycle.run_cycle().await.unwrap();
    assert_eq!(result.sent, 0);
    assert_eq!(result.errors, 0);

    // The degenerate window was still offered to the fetcher.
    let windows = fetcher.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].0, future);
    assert!(windows[0].1 <= future);

    let state = store.statistics(&kind).await.unwrap().unwrap();
    assert_eq!(state.last_fetch_timestamp, Some(future));
}

#[tokio::test]
async fn tracked_keys_accumulate_across_cycles() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let fetcher = ScriptedFetcher::new(vec![
        Ok(report_with(vec![record(1, "sensor-a")])),
        Ok(report_with(vec![record(2, "sensor-b")])),
    ]);
    let forwarder = RecordingForwarder::accepting();
    let cycle = ForwardCycle::new(
        stream_config(),
        fetcher,
        forwarder,
        store.clone(),
        CycleConfig::default(),
    );

    cycle.run_cycle().await.unwrap();
    cycle.run_cycle().await.unwrap();

    let state = store
        .statistics(&StreamKind::new("readings"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.tracked_keys.len(), 2);
    assert!(state.tracked_keys.contains("sensor-a"));
    assert!(state.tracked_keys.contains("sensor-b"));
}
