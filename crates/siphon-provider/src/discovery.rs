//! Location discovery for the fan-out fetch strategy.
//!
//! The provider cannot filter coverage queries by owner identity, so a fetch
//! first enumerates devices through a cheap discovery call, keeps the entries
//! whose owner matches the configured identity filter, and collects the
//! distinct location labels to query one at a time. Label mapping between the
//! discovery namespace and the coverage-query namespace is an explicit
//! function with a documented failure mode: an unmappable label is skipped,
//! never guessed.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

/// Device-cluster discovery response.
#[derive(Debug, Deserialize)]
pub(crate) struct DiscoveryResponse {
    #[serde(default)]
    pub(crate) objs: Vec<ClusterEntry>,
}

/// One discovered cluster: an owning organization plus its devices.
#[derive(Debug, Deserialize)]
pub(crate) struct ClusterEntry {
    pub(crate) owner: Option<EntryOwner>,
    pub(crate) data: Option<ClusterData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryOwner {
    #[serde(default)]
    pub(crate) org: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterData {
    #[serde(default)]
    pub(crate) devices: Vec<ClusterDevice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterDevice {
    pub(crate) id: Option<String>,
    pub(crate) meta: Option<DeviceMeta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceMeta {
    /// Hierarchy labels, broadest first (site, floor, zone, ...).
    #[serde(default)]
    pub(crate) location: Vec<String>,
}

/// Case-insensitive substring match of the identity filter against an owner
/// organization. An absent filter accepts every owner.
fn matches_identity(owner_org: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) => owner_org.to_lowercase().contains(&f.to_lowercase()),
        None => true,
    }
}

/// Distinct, sorted top-level location labels from matching entries.
///
/// A device's first location element names the partition that coverage
/// queries filter on. Devices without location metadata contribute nothing.
pub(crate) fn distinct_locations(
    response: &DiscoveryResponse,
    filter: Option<&str>,
) -> Vec<String> {
    let mut labels = BTreeSet::new();
    for entry in &response.objs {
        let org = entry.owner.as_ref().map_or("", |o| o.org.as_str());
        if !matches_identity(org, filter) {
            debug!(owner = org, "discovery entry skipped by identity filter");
            continue;
        }
        let devices = entry.data.as_ref().map_or(&[][..], |d| d.devices.as_slice());
        for device in devices {
            match device.meta.as_ref().and_then(|m| m.location.first()) {
                Some(label) => {
                    labels.insert(label.clone());
                }
                None => debug!(
                    device = device.id.as_deref().unwrap_or("unknown"),
                    "device carries no location metadata"
                ),
            }
        }
    }
    labels.into_iter().collect()
}

/// Map a discovered location label to the name coverage queries expect.
///
/// With no prefix configured the label passes through unchanged. With a
/// prefix, `"<prefix> <rest>"` maps to `"<rest>"`. Anything else, including a
/// bare prefix with nothing after it, has no defined mapping and yields
/// `None`; callers skip the location and log it rather than querying a
/// mis-routed name.
#[must_use]
pub fn map_location(label: &str, prefix: Option<&str>) -> Option<String> {
    let Some(prefix) = prefix else {
        return Some(label.to_string());
    };
    let rest = label.strip_prefix(prefix)?.strip_prefix(' ')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
