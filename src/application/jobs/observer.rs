use async_trait::async_trait;

use crate::domain::entities::PublishJob;

/// Reacts to queue lifecycle events. Every method defaults to doing nothing.
///
/// Observers are called after the queue lock has been released.
#[async_trait]
pub trait QueueObserver: Send + Sync {
    async fn job_enqueued(&self, _job: &PublishJob) {}

    async fn job_started(&self, _job: &PublishJob) {}

    async fn job_finished(&self, _job: &PublishJob) {}

    /// A pending or running job was cancelled.
    async fn job_removed(&self, _job: &PublishJob) {}

    /// Publish locks on the job's resources must be dropped.
    async fn release_locks(&self, _job: &PublishJob) {}
}
