use serde::Serialize;

/// Statistics about render cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// `ensure` and `touch` calls served from a resident surface
    pub hits: u64,

    /// `ensure` calls that started a rasterization
    pub misses: u64,

    /// `ensure` calls attached to an in-flight request
    pub dedup_hits: u64,

    /// Requests handed to the document engine (pages and thumbnails)
    pub rasterizations: u64,

    /// Requests whose scale was lowered to fit the canvas cap
    pub downshifts: u64,

    /// Surfaces evicted under budget pressure
    pub evictions: u64,

    /// Completed requests discarded because they were superseded or cancelled
    pub stale_discards: u64,

    /// Requests that failed in the engine
    pub failures: u64,

    /// Pages with a resident surface
    pub resident_pages: usize,

    /// Bytes held by resident surfaces
    pub resident_bytes: usize,

    /// Byte ceiling derived from the budget
    pub byte_limit: usize,

    /// Thumbnails currently cached
    pub thumbnails: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0), counting dedup attaches as hits
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.dedup_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Calculate memory utilization (may exceed 1.0 while the pinned window overshoots)
    pub fn memory_utilization(&self) -> f64 {
        if self.byte_limit == 0 {
            0.0
        } else {
            self.resident_bytes as f64 / self.byte_limit as f64
        }
    }
}
