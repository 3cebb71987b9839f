//! Cache configuration.
//!
//! Controls the Flex output cache via the `[cache]` table of `flexcache.toml`.

use serde::Deserialize;

const DEFAULT_CAPACITY_BYTES: usize = 2_000_000;
const DEFAULT_EVICT_TO_BYTES: usize = 1_500_000;
const DEFAULT_MAX_ENTRY_BYTES: usize = 400_000;

/// Cache configuration from `flexcache.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disabled caches answer every lookup with a miss and admit nothing.
    pub enabled: bool,
    /// Upper bound on the summed cost of all entries.
    pub capacity_bytes: usize,
    /// Low-water mark eviction stops at once the capacity was exceeded.
    pub evict_to_bytes: usize,
    /// Entries costing more than this are never admitted.
    pub max_entry_bytes: usize,
    /// Default expiry interval applied to admitted entries without an explicit expiry.
    pub expiry_interval_minutes: Option<i64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            evict_to_bytes: DEFAULT_EVICT_TO_BYTES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            expiry_interval_minutes: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity_bytes: settings.capacity_bytes,
            evict_to_bytes: settings.evict_to_bytes,
            max_entry_bytes: settings.max_entry_bytes,
            expiry_interval_minutes: settings.expiry_interval_minutes,
        }
    }
}

impl CacheConfig {
    /// Low-water mark, clamped to the capacity.
    pub fn evict_to_bytes_clamped(&self) -> usize {
        self.evict_to_bytes.min(self.capacity_bytes)
    }

    /// Per-entry admission limit, clamped to the capacity.
    pub fn max_entry_bytes_clamped(&self) -> usize {
        self.max_entry_bytes.min(self.capacity_bytes)
    }
}
