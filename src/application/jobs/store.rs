//! Durable storage for publish jobs.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::error::StoreError;
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::PublishJob;

const SOURCE: &str = "application::jobs::store";

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &PublishJob) -> Result<(), StoreError>;

    async fn update(&self, job: &PublishJob) -> Result<(), StoreError>;

    /// Deleting a job that is not stored is not an error.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Stored jobs enqueued at or after `since`, oldest first.
    ///
    /// `limit` bounds the finished jobs returned, keeping the most recent ones. Jobs that
    /// have not finished are always returned.
    async fn read_all(
        &self,
        since: Option<OffsetDateTime>,
        limit: usize,
    ) -> Result<Vec<PublishJob>, StoreError>;
}

/// Orders and bounds stored jobs the way [`JobStore::read_all`] promises.
pub(crate) fn select_for_revival(
    jobs: impl IntoIterator<Item = PublishJob>,
    since: Option<OffsetDateTime>,
    limit: usize,
) -> Vec<PublishJob> {
    let (mut finished, mut selected): (Vec<_>, Vec<_>) = jobs
        .into_iter()
        .filter(|job| since.is_none_or(|since| job.enqueued_at >= since))
        .partition(PublishJob::is_finished);

    finished.sort_by(oldest_first);
    let skipped = finished.len().saturating_sub(limit);
    selected.extend(finished.drain(skipped..));
    selected.sort_by(oldest_first);
    selected
}

fn oldest_first(a: &PublishJob, b: &PublishJob) -> Ordering {
    a.enqueued_at
        .cmp(&b.enqueued_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Keeps jobs in process memory. Useful for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, PublishJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = PublishJob>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|job| (job.id, job)).collect()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<PublishJob> {
        rw_read(&self.jobs, SOURCE, "get").get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.jobs, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &PublishJob) -> Result<(), StoreError> {
        rw_write(&self.jobs, SOURCE, "create").insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &PublishJob) -> Result<(), StoreError> {
        rw_write(&self.jobs, SOURCE, "update").insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        rw_write(&self.jobs, SOURCE, "delete").remove(&id);
        Ok(())
    }

    async fn read_all(
        &self,
        since: Option<OffsetDateTime>,
        limit: usize,
    ) -> Result<Vec<PublishJob>, StoreError> {
        let jobs: Vec<_> = rw_read(&self.jobs, SOURCE, "read_all")
            .values()
            .cloned()
            .collect();
        Ok(select_for_revival(jobs, since, limit))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::types::JobOutcome;

    fn job_at(at: OffsetDateTime) -> PublishJob {
        let mut job = PublishJob::new("tester", vec!["/a.html".into()]);
        job.enqueued_at = at;
        job
    }

    #[tokio::test]
    async fn read_all_orders_filters_and_limits() {
        let old = job_at(datetime!(2024-01-01 00:00 UTC));
        let mid = job_at(datetime!(2024-02-01 00:00 UTC));
        let new = job_at(datetime!(2024-03-01 00:00 UTC));
        let store = MemoryJobStore::with_jobs([new.clone(), old.clone(), mid.clone()]);

        let all = store.read_all(None, 10).await.expect("read all");
        assert_eq!(all, vec![old, mid.clone(), new.clone()]);

        let recent = store
            .read_all(Some(datetime!(2024-02-01 00:00 UTC)), 10)
            .await
            .expect("read recent");
        assert_eq!(recent, vec![mid.clone(), new.clone()]);

        let limited = store
            .read_all(Some(datetime!(2024-01-15 00:00 UTC)), 1)
            .await
            .expect("read limited");
        assert_eq!(limited, vec![mid, new]);
    }

    fn finished_at(at: OffsetDateTime) -> PublishJob {
        let mut job = job_at(at);
        job.start(at).expect("start");
        job.finish(at, JobOutcome::Succeeded).expect("finish");
        job
    }

    #[tokio::test]
    async fn limit_only_bounds_finished_jobs() {
        let done_old = finished_at(datetime!(2024-01-01 00:00 UTC));
        let done_mid = finished_at(datetime!(2024-01-02 00:00 UTC));
        let done_new = finished_at(datetime!(2024-01-03 00:00 UTC));
        let waiting = job_at(datetime!(2024-01-04 00:00 UTC));
        let mut running = job_at(datetime!(2024-01-05 00:00 UTC));
        running
            .start(datetime!(2024-01-05 00:01 UTC))
            .expect("start");
        let store = MemoryJobStore::with_jobs([
            waiting.clone(),
            done_old,
            running.clone(),
            done_new.clone(),
            done_mid.clone(),
        ]);

        let read = store.read_all(None, 2).await.expect("read");
        assert_eq!(read, vec![done_mid, done_new, waiting, running]);

        let read = store.read_all(None, 0).await.expect("read");
        assert_eq!(read.len(), 2);
        assert!(read.iter().all(|job| !job.is_finished()));
    }

    #[tokio::test]
    async fn delete_of_missing_job_is_ok() {
        let store = MemoryJobStore::new();
        store.delete(Uuid::new_v4()).await.expect("delete missing");
        assert!(store.is_empty());
    }
}
