//! Publish worker.
//!
//! Claims jobs from the [`PublishQueue`], runs the external publish action, evicts the
//! cached variations of everything that was published and finishes the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::application::error::{PublishError, QueueError};
use crate::application::jobs::PublishQueue;
use crate::cache::CacheTrigger;
use crate::domain::entities::PublishJob;
use crate::domain::types::JobOutcome;

/// Promotes the content of a job's resources to live.
#[async_trait]
pub trait PublishAction: Send + Sync {
    async fn publish(&self, job: &PublishJob) -> Result<(), PublishError>;
}

pub struct PublishEngine {
    queue: Arc<PublishQueue>,
    trigger: CacheTrigger,
    action: Arc<dyn PublishAction>,
}

impl PublishEngine {
    pub fn new(queue: Arc<PublishQueue>, trigger: CacheTrigger, action: Arc<dyn PublishAction>) -> Self {
        Self {
            queue,
            trigger,
            action,
        }
    }

    pub fn queue(&self) -> &Arc<PublishQueue> {
        &self.queue
    }

    /// Publishes the oldest pending job, if any, and returns it finished.
    ///
    /// A failing publish action finishes the job as failed; it is not an error here.
    #[instrument(skip(self))]
    pub async fn run_next(&self) -> Result<Option<PublishJob>, QueueError> {
        let Some(job) = self.queue.next().await? else {
            return Ok(None);
        };

        let started = Instant::now();
        let outcome = match self.action.publish(&job).await {
            Ok(()) => {
                self.trigger.resources_published(&job.resources);
                JobOutcome::Succeeded
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Publish action failed");
                JobOutcome::failed(err.to_string())
            }
        };
        histogram!("flexcache_publish_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        match self.queue.finish(job.id, outcome).await {
            Ok(finished) => Ok(Some(finished)),
            Err(QueueError::UnknownJob(id)) => {
                debug!(job_id = %id, "Publish job was removed while running");
                Ok(Some(job))
            }
            Err(err) => Err(err),
        }
    }

    /// Publishes pending jobs until the queue is empty, returning how many ran.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut published = 0;
        while self.run_next().await?.is_some() {
            published += 1;
        }
        Ok(published)
    }

    /// One round of background work: drain, abandon overdue jobs, sweep expired entries.
    pub async fn tick(&self) {
        if let Err(err) = self.drain().await {
            error!(error = %err, "Draining the publish queue failed");
        }

        if let Some(timeout) = self.queue.config().job_timeout
            && let Err(err) = self.queue.abandon_overdue(timeout).await
        {
            error!(error = %err, "Abandoning overdue publish jobs failed");
        }

        let purged = self.trigger.cache().purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
    }
}

/// Runs [`PublishEngine::tick`] every `interval` until the handle is aborted.
pub fn spawn_worker(engine: Arc<PublishEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            engine.tick().await;
        }
    })
}
