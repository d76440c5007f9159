use std::collections::HashMap;

use parking_lot::RwLock;

/// In-memory vote counts, kept equal to the ballot store by the admission controller.
///
/// Never persisted. [`TallyCache::rebuild`] runs once at startup before the cache is
/// shared; until then the counts mean nothing.
#[derive(Debug, Default)]
pub struct TallyCache {
    counts: RwLock<HashMap<i64, u64>>,
}

impl TallyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&self, snapshot: HashMap<i64, u64>) {
        *self.counts.write() = snapshot;
    }

    pub fn increment(&self, candidate_id: i64) {
        *self.counts.write().entry(candidate_id).or_insert(0) += 1;
    }

    /// Point-in-time copy. Writers keep going on the live map.
    pub fn snapshot_for_read(&self) -> HashMap<i64, u64> {
        self.counts.read().clone()
    }

    pub fn count(&self, candidate_id: i64) -> u64 {
        self.counts.read().get(&candidate_id).copied().unwrap_or(0)
    }
}
