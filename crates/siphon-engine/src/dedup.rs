//! Best-effort duplicate suppression.

use indexmap::IndexSet;
use siphon_types::record::RecordId;

/// Insertion-ordered window of recently forwarded record ids.
///
/// The filter is a recency window, not an exact ledger: when it fills, the
/// older half is dropped, so an id that fell out of the window can be
/// forwarded again. Sinks tolerate the occasional duplicate; suppression
/// here only cuts volume.
#[derive(Debug)]
pub struct DuplicateFilter {
    seen: IndexSet<RecordId>,
    capacity: usize,
}

impl DuplicateFilter {
    /// Create a filter holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: IndexSet::new(),
            // Halving a one-element window would empty it.
            capacity: capacity.max(2),
        }
    }

    /// Check and record one id.
    ///
    /// Returns `true` when `id` is already inside the window; otherwise the
    /// id is admitted (evicting the older half if the window is full) and
    /// `false` is returned.
    pub fn is_duplicate(&mut self, id: &RecordId) -> bool {
        if self.seen.contains(id) {
            return true;
        }
        if self.seen.len() >= self.capacity {
            self.seen = self.seen.split_off(self.seen.len() / 2);
        }
        self.seen.insert(id.clone());
        false
    }

    /// Number of ids currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
