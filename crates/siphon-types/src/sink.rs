//! Sink side of the relay seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::record::Record;

/// Delivery outcome for one endpoint in a fan-out send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResult {
    pub endpoint: String,
    pub batches_delivered: u32,
    /// First delivery error for this endpoint, if any.
    pub error: Option<String>,
}

/// Outcome of forwarding a batch of records to all configured endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Records accepted by at least the required set of endpoints.
    pub sent: u64,
    /// Records dropped before delivery (serialization failures).
    pub records_failed: u64,
    pub endpoint_results: Vec<EndpointResult>,
}

impl DeliveryReport {
    /// Endpoints that reported a delivery error.
    #[must_use]
    pub fn failed_endpoints(&self) -> Vec<&EndpointResult> {
        self.endpoint_results
            .iter()
            .filter(|r| r.error.is_some())
            .collect()
    }
}

/// Forwards deduplicated records to the configured sink endpoints.
#[async_trait]
pub trait SinkForwarder: Send + Sync {
    /// Deliver `records` to every endpoint in fixed-size chunks.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery fails hard enough that the cycle must
    /// not advance its cursor; partial outcomes under a lenient failure
    /// policy are reported through [`DeliveryReport`] instead.
    async fn send_batch(&self, records: &[Record]) -> Result<DeliveryReport, RelayError>;

    /// Release endpoint connections. Further sends reconnect lazily.
    async fn close(&self);
}
