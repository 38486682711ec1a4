//! Record model: one forwarded unit of data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable record identifier used for deduplication.
///
/// Derived from the provider's native identity fields via [`RecordId::derive`],
/// so re-fetching the same upstream record always yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an already-derived identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from the provider's native identity fields.
    ///
    /// Fields are digested with a separator byte so `["ab", "c"]` and
    /// `["a", "bc"]` produce different ids.
    #[must_use]
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for RecordId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// One forwarded unit of data.
///
/// Built by the source fetcher from provider responses, optionally enriched
/// with location tags during fan-out, and never mutated once it reaches the
/// sink forwarder. Only `id`, `timestamp`, and `source_key` outlive delivery
/// (in the dedup window and persisted statistics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Event time, used for windowing and gap detection.
    pub timestamp: DateTime<Utc>,
    /// Originating device or entity.
    pub source_key: String,
    /// Ordered hierarchy labels (site, zone, ...) attached during fan-out.
    #[serde(default)]
    pub location_tags: Vec<String>,
    /// Provider payload, opaque except for fields used in routing.
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// First location tag, used as the routing "group" property.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.location_tags.first().map(String::as_str)
    }
}
