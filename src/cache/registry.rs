//! Variation registry.
//!
//! Tracks which output variations are cached for each resource, so that publishing a
//! resource can find and evict every variation rendered from it. Entries deregister
//! themselves when the cache drops them.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Maps resource -> variation -> id of the entry currently cached for it.
#[derive(Default)]
pub struct VariationRegistry {
    resources: RwLock<HashMap<String, HashMap<String, Uuid>>>,
}

impl VariationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entry_id` as the entry cached under `key`, replacing any previous one.
    pub fn register(&self, key: &CacheKey, entry_id: Uuid) {
        rw_write(&self.resources, SOURCE, "register")
            .entry(key.resource().to_string())
            .or_default()
            .insert(key.variation().to_string(), entry_id);
    }

    /// Removes `key` only if it still points at `entry_id`.
    ///
    /// A replaced entry detaching late must not erase the registration of its successor.
    pub fn detach(&self, key: &CacheKey, entry_id: Uuid) -> bool {
        let mut resources = rw_write(&self.resources, SOURCE, "detach");
        let Some(variations) = resources.get_mut(key.resource()) else {
            return false;
        };
        if variations.get(key.variation()) != Some(&entry_id) {
            return false;
        }
        variations.remove(key.variation());
        if variations.is_empty() {
            resources.remove(key.resource());
        }
        true
    }

    /// All cached variation keys of `resource`.
    pub fn keys_for_resource(&self, resource: &str) -> Vec<CacheKey> {
        rw_read(&self.resources, SOURCE, "keys_for_resource")
            .get(resource)
            .map(|variations| {
                variations
                    .keys()
                    .map(|variation| CacheKey::new(resource, variation.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn entry_id(&self, key: &CacheKey) -> Option<Uuid> {
        rw_read(&self.resources, SOURCE, "entry_id")
            .get(key.resource())
            .and_then(|variations| variations.get(key.variation()))
            .copied()
    }

    pub fn clear(&self) {
        rw_write(&self.resources, SOURCE, "clear").clear();
    }

    /// Number of resources with at least one cached variation.
    pub fn resource_count(&self) -> usize {
        rw_read(&self.resources, SOURCE, "resource_count").len()
    }

    /// Number of cached variations across all resources.
    pub fn variation_count(&self) -> usize {
        rw_read(&self.resources, SOURCE, "variation_count")
            .values()
            .map(HashMap::len)
            .sum()
    }
}
