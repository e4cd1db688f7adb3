// SPDX-License-Identifier: GPL-3.0-or-later
use encore_domain::{LibraryFingerprint, RecommendationBatch};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Identifies a cached result: same library, same provider, same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub provider: String,
    pub model: String,
}

impl CacheKey {
    pub fn new(fingerprint: &LibraryFingerprint, provider: &str, model: &str) -> Self {
        Self {
            fingerprint: fingerprint.hash().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

/// TTL cache of finished recommendation batches, shared across fetch cycles.
#[derive(Clone)]
pub struct RecommendationCache {
    inner: Cache<CacheKey, Arc<RecommendationBatch>>,
}

impl RecommendationCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<RecommendationBatch>> {
        let hit = self.inner.get(key);
        debug!(
            target: "cache",
            provider = %key.provider,
            model = %key.model,
            hit = hit.is_some(),
            "recommendation cache lookup"
        );
        hit
    }

    pub fn insert(&self, key: CacheKey, batch: RecommendationBatch) {
        self.inner.insert(key, Arc::new(batch));
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
