//! Caching layer for concord-runtime.
//!
//! Memoizes evidence assessments per rationale text. The assessor is pure, so
//! a cached quality is always the one a fresh assessment would produce.

use moka::future::Cache;
use std::time::Duration;

use concord_core::{EvidenceAssessor, EvidenceQuality};

use crate::config::EvidenceCacheConfig;

/// Evidence assessment cache using moka.
pub struct EvidenceCache {
    cache: Cache<String, EvidenceQuality>,
}

impl EvidenceCache {
    /// Create a new cache with the given limits.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &EvidenceCacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    /// Quality of a rationale, assessed at most once per cache lifetime.
    pub async fn assess(&self, assessor: &EvidenceAssessor, rationale: &str) -> EvidenceQuality {
        self.cache
            .get_with(rationale.to_string(), async { assessor.assess(rationale) })
            .await
    }

    /// Get a cached quality without assessing.
    pub async fn get(&self, rationale: &str) -> Option<EvidenceQuality> {
        self.cache.get(rationale).await
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Get cache statistics.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for EvidenceCache {
    fn default() -> Self {
        Self::from_config(&EvidenceCacheConfig::default())
    }
}
