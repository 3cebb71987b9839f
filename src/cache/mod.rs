//! Flex output cache.
//!
//! Rendered output variations are stored as frozen [`CacheEntry`] values in a
//! cost-bounded LRU engine and replayed without re-rendering:
//!
//! - **Engine** (`lru`): generic O(1) LRU bounded by summed object cost
//! - **Entries** (`entry`): ordered fragments, include directives, headers, redirects
//! - **Facade** (`store`): expiry-aware lookups and per-resource invalidation
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `flexcache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity_bytes = 2000000
//! evict_to_bytes = 1500000
//! max_entry_bytes = 400000
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod error;
mod keys;
pub(crate) mod lock;
mod lru;
mod registry;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use entry::{
    BufferedOutput, CacheEntry, Element, FlexRequest, HeaderMap, IncludeDispatcher, OutputSink,
    ParameterMap, Redirect,
};
pub use error::CacheError;
pub use keys::{CacheKey, variation_from_parameters};
pub use lru::{Cacheable, LruCache};
pub use registry::VariationRegistry;
pub use store::{CacheStats, FlexCache};
pub use trigger::CacheTrigger;
