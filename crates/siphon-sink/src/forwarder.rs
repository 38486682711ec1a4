//! Fan-out replication of record batches across endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use siphon_types::config::{EndpointFailurePolicy, SinkConfig};
use siphon_types::error::RelayError;
use siphon_types::record::{Record, RecordId};
use siphon_types::sink::{DeliveryReport, EndpointResult, SinkForwarder};
use tracing::{debug, warn};

use crate::endpoint::HttpEndpoint;

/// One delivery target under the forwarder.
///
/// The forwarder replicates every chunk to every transport and tracks their
/// results independently.
#[async_trait]
pub(crate) trait BatchTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn post_batch(&self, batch: &[Value]) -> Result<(), RelayError>;
    async fn close(&self);
}

/// Wire envelope for one record: the payload plus routing properties that
/// downstream consumers can filter on without parsing the payload.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    id: &'a RecordId,
    timestamp: DateTime<Utc>,
    properties: RoutingProperties<'a>,
    payload: &'a serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct RoutingProperties<'a> {
    source_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
    origin: &'a str,
}

/// Delivers each batch to every configured endpoint.
pub struct FanoutForwarder {
    transports: Vec<Box<dyn BatchTransport>>,
    max_batch_size: usize,
    policy: EndpointFailurePolicy,
    origin: String,
}

impl FanoutForwarder {
    #[must_use]
    pub fn new(config: &SinkConfig) -> Self {
        let timeout = Duration::from_secs(config.send_timeout_secs);
        let transports = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Box::new(HttpEndpoint::new(endpoint, timeout)) as Box<dyn BatchTransport>
            })
            .collect();
        Self {
            transports,
            max_batch_size: config.max_batch_size.max(1),
            policy: config.on_endpoint_failure,
            origin: config.origin.clone(),
        }
    }

    #[cfg(test)]
    fn with_transports(
        transports: Vec<Box<dyn BatchTransport>>,
        max_batch_size: usize,
        policy: EndpointFailurePolicy,
        origin: &str,
    ) -> Self {
        Self {
            transports,
            max_batch_size,
            policy,
            origin: origin.to_string(),
        }
    }

    fn envelope(&self, record: &Record) -> Result<Value, serde_json::Error> {
        serde_json::to_value(EventEnvelope {
            id: &record.id,
            timestamp: record.timestamp,
            properties: RoutingProperties {
                source_key: &record.source_key,
                group: record.group(),
                origin: &self.origin,
            },
            payload: &record.payload,
        })
    }
}

#[async_trait]
impl SinkForwarder for FanoutForwarder {
    async fn send_batch(&self, records: &[Record]) -> Result<DeliveryReport, RelayError> {
        let mut report = DeliveryReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let mut envelopes = Vec::with_capacity(records.len());
        for record in records {
            match self.envelope(record) {
                Ok(value) => envelopes.push(value),
                Err(error) => {
                    report.records_failed += 1;
                    warn!(record = %record.id, error = %error, "record not serializable, skipped");
                }
            }
        }

        for transport in &self.transports {
            let mut result = EndpointResult {
                endpoint: transport.name().to_string(),
                batches_delivered: 0,
                error: None,
            };
            for chunk in envelopes.chunks(self.max_batch_size) {
                match transport.post_batch(chunk).await {
                    Ok(()) => result.batches_delivered += 1,
                    Err(error) => {
                        warn!(
                            endpoint = transport.name(),
                            error = %error,
                            "batch delivery failed, abandoning endpoint for this cycle"
                        );
                        result.error = Some(error.message.clone());
                        break;
                    }
                }
            }
            report.endpoint_results.push(result);
        }

        let failed = report.failed_endpoints().len();
        let total = report.endpoint_results.len();
        let details = serde_json::to_value(&report.endpoint_results).unwrap_or_default();
        if failed == total {
            return Err(RelayError::sink(
                "ALL_ENDPOINTS_FAILED",
                format!("delivery failed on all {total} endpoints"),
            )
            .with_details(details));
        }
        if failed > 0 && self.policy == EndpointFailurePolicy::FailCycle {
            return Err(RelayError::sink(
                "ENDPOINT_FAILED",
                format!("delivery failed on {failed}/{total} endpoints"),
            )
            .with_details(details));
        }

        report.sent = envelopes.len() as u64;
        Ok(report)
    }

    async fn close(&self) {
        for transport in &self.transports {
            transport.close().await;
        }
        debug!(endpoints = self.transports.len(), "sink connections released");
    }
}
