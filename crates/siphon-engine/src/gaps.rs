//! Reporting gap detection across fetched records.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use siphon_types::record::Record;

/// One detected pause in a source key's cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub source_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: i64,
}

/// Find pauses in per-key record cadence.
///
/// Records are grouped by source key and ordered by event time; a spacing
/// wider than 1.5x the expected interval is reported. Diagnostic only: gaps
/// are logged and never affect forwarding or the cursor.
#[must_use]
pub fn detect_gaps(records: &[Record], expected_interval_minutes: u32) -> Vec<Gap> {
    // 90 seconds per expected minute = the 1.5x threshold.
    let threshold = Duration::seconds(i64::from(expected_interval_minutes) * 90);
    let mut by_key: BTreeMap<&str, Vec<DateTime<Utc>>> = BTreeMap::new();
    for record in records {
        by_key
            .entry(record.source_key.as_str())
            .or_default()
            .push(record.timestamp);
    }

    let mut gaps = Vec::new();
    for (key, mut times) in by_key {
        times.sort_unstable();
        for pair in times.windows(2) {
            let spacing = pair[1] - pair[0];
            if spacing > threshold {
                gaps.push(Gap {
                    source_key: key.to_string(),
                    start: pair[0],
                    end: pair[1],
                    minutes: spacing.num_minutes(),
                });
            }
        }
    }
    gaps
}
