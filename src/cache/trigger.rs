//! Cache invalidation driven by publishing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::jobs::QueueObserver;
use crate::domain::entities::PublishJob;

use super::store::FlexCache;

/// Evicts cached variations of resources whose content changed.
///
/// The publish engine calls it after a successful publish; as a queue observer it also
/// reacts to cancelled jobs, whose resources may have been partially published.
#[derive(Clone)]
pub struct CacheTrigger {
    cache: Arc<FlexCache>,
}

impl CacheTrigger {
    pub fn new(cache: Arc<FlexCache>) -> Self {
        Self { cache }
    }

    /// Drops every variation of `resources`, returning how many were cached.
    pub fn resources_published(&self, resources: &[String]) -> usize {
        if !self.cache.is_enabled() {
            debug!("Cache trigger skipped: cache disabled");
            return 0;
        }
        let invalidated = self.cache.invalidate_resources(resources);
        debug!(
            resources = resources.len(),
            invalidated, "Invalidated published resources"
        );
        invalidated
    }

    pub fn cache(&self) -> &Arc<FlexCache> {
        &self.cache
    }
}

#[async_trait]
impl QueueObserver for CacheTrigger {
    async fn job_removed(&self, job: &PublishJob) {
        self.resources_published(&job.resources);
    }
}
