mod config;
mod observer;
mod queue;
mod resolver;
mod revival;
mod store;

pub use config::{PersistenceMode, QueueConfig};
pub use observer::QueueObserver;
pub use queue::{Durability, PublishQueue, QueueStats};
pub use resolver::{ResourceResolver, StoredResourceResolver};
pub use revival::RevivalReport;
pub use store::{JobStore, MemoryJobStore};

pub(crate) use store::select_for_revival;
