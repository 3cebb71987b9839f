//! Flex output cache.
//!
//! Wires the cost-bounded LRU engine to the variation registry: lookups honor entry
//! expiry, admissions enforce the per-entry limit, and publishing a resource evicts every
//! variation rendered from it.

use std::sync::Arc;

use metrics::{counter, gauge};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::error::CacheError;
use super::keys::CacheKey;
use super::lru::{Cacheable, LruCache};
use super::registry::VariationRegistry;

/// Point-in-time view of the cache for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub cost_bytes: usize,
    pub capacity_bytes: usize,
    pub resources: usize,
    pub variations: usize,
}

pub struct FlexCache {
    config: CacheConfig,
    engine: LruCache<CacheKey, CacheEntry>,
    registry: Arc<VariationRegistry>,
}

impl FlexCache {
    pub fn new(config: CacheConfig) -> Self {
        let engine =
            LruCache::with_low_water(config.capacity_bytes, config.evict_to_bytes_clamped());
        Self {
            config,
            engine,
            registry: Arc::new(VariationRegistry::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VariationRegistry> {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.get_at(key, OffsetDateTime::now_utc())
    }

    /// Looks up `key` as of `now`. Expired entries are dropped and reported as a miss.
    pub fn get_at(&self, key: &CacheKey, now: OffsetDateTime) -> Option<Arc<CacheEntry>> {
        if !self.config.enabled {
            counter!("flexcache_miss_total").increment(1);
            return None;
        }

        let Some(entry) = self.engine.get(key) else {
            counter!("flexcache_miss_total").increment(1);
            return None;
        };

        if entry.is_expired_at(now) {
            debug!(%key, "Dropping expired cache entry");
            self.engine.remove_exact(key, &entry);
            counter!("flexcache_miss_total").increment(1);
            self.record_gauges();
            return None;
        }

        counter!("flexcache_hit_total").increment(1);
        Some(entry)
    }

    /// Admits a completed entry under `key`, replacing any previous variation.
    ///
    /// Entries without an explicit expiry get the configured default interval.
    #[instrument(skip_all, fields(key = %key))]
    pub fn put(&self, key: CacheKey, mut entry: CacheEntry) -> Result<Arc<CacheEntry>, CacheError> {
        if !entry.is_completed() {
            return Err(CacheError::Incomplete);
        }

        let cost = entry.cost();
        let limit = self.config.max_entry_bytes_clamped();
        if cost > limit {
            counter!("flexcache_rejected_total").increment(1);
            debug!(cost, limit, "Cache entry rejected: over per-entry limit");
            return Err(CacheError::rejected(cost, limit));
        }

        if entry.date_expires().is_none()
            && let Some(interval) = self.config.expiry_interval_minutes
        {
            entry.set_date_expires_to_next_timeout(interval);
        }

        let entry = Arc::new(entry);
        if !self.config.enabled {
            debug!("Cache disabled: entry served uncached");
            return Ok(entry);
        }

        entry.attach_variation(key.clone(), &self.registry);
        self.registry.register(&key, entry.id());

        match self.engine.add(key.clone(), Arc::clone(&entry)) {
            Ok(evicted) => {
                if evicted > 0 {
                    counter!("flexcache_evict_total").increment(evicted as u64);
                    debug!(evicted, "Evicted least recently used entries");
                }
                self.record_gauges();
                Ok(entry)
            }
            Err(err) => {
                self.registry.detach(&key, entry.id());
                counter!("flexcache_rejected_total").increment(1);
                Err(err)
            }
        }
    }

    /// Drops a single variation. Returns whether it was cached.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.engine.remove(key).is_some();
        if removed {
            counter!("flexcache_invalidated_total").increment(1);
            self.record_gauges();
        }
        removed
    }

    /// Drops every cached variation of `resource`.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        let removed = self
            .registry
            .keys_for_resource(resource)
            .iter()
            .filter(|key| self.engine.remove(key).is_some())
            .count();
        if removed > 0 {
            counter!("flexcache_invalidated_total").increment(removed as u64);
            self.record_gauges();
        }
        removed
    }

    pub fn invalidate_resources<S: AsRef<str>>(&self, resources: &[S]) -> usize {
        resources
            .iter()
            .map(|resource| self.invalidate_resource(resource.as_ref()))
            .sum()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(OffsetDateTime::now_utc())
    }

    /// Drops every entry that is expired as of `now`.
    pub fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
        let removed = self.engine.remove_where(|_, entry| entry.is_expired_at(now));
        if removed > 0 {
            counter!("flexcache_invalidated_total").increment(removed as u64);
            self.record_gauges();
        }
        removed
    }

    pub fn clear(&self) {
        self.engine.clear();
        self.registry.clear();
        self.record_gauges();
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.engine.len(),
            cost_bytes: self.engine.cost(),
            capacity_bytes: self.engine.capacity(),
            resources: self.registry.resource_count(),
            variations: self.registry.variation_count(),
        }
    }

    fn record_gauges(&self) {
        gauge!("flexcache_entries").set(self.engine.len() as f64);
        gauge!("flexcache_cost_bytes").set(self.engine.cost() as f64);
    }
}
