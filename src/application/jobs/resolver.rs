use async_trait::async_trait;

use crate::application::error::ResolveError;
use crate::domain::entities::PublishJob;

/// Re-derives the resources a stored job publishes.
///
/// During revival the stored list may be stale: resources can have been deleted or moved
/// while the process was down. Implementations look the job up by its id, which is also
/// its publish history id.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, job: &PublishJob) -> Result<Vec<String>, ResolveError>;
}

/// Trusts the resource list persisted with the job.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredResourceResolver;

#[async_trait]
impl ResourceResolver for StoredResourceResolver {
    async fn resolve(&self, job: &PublishJob) -> Result<Vec<String>, ResolveError> {
        if job.resources.is_empty() {
            return Err(ResolveError::new(job.id, "job has no resources to publish"));
        }
        Ok(job.resources.clone())
    }
}
