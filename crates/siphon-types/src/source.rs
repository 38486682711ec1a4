//! Source side of the relay seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RelayError;
use crate::record::Record;

/// Outcome of fetching one time window from the provider.
///
/// Location and record failures inside the window are absorbed into counters
/// rather than failing the fetch; only errors that invalidate the whole
/// window surface as [`RelayError`].
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub records: Vec<Record>,
    /// Provider queries issued, including discovery and per-location pages.
    pub pages_fetched: u32,
    /// Fan-out locations that failed and were skipped.
    pub location_failures: u32,
    /// Records dropped during transformation.
    pub record_failures: u64,
    /// Set when the fetch ran in a degraded mode (e.g. deprecated strategy).
    pub degraded: Option<String>,
}

/// Pulls records for a half-open time window `[from, to)`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch all records with event time inside the window.
    ///
    /// # Errors
    ///
    /// Returns an error when the window as a whole cannot be fetched, e.g.
    /// credential exchange failure or discovery failure. Per-location and
    /// per-record failures are reported through [`FetchReport`] counters.
    async fn fetch_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<FetchReport, RelayError>;
}
