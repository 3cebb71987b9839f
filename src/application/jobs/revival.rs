//! Startup recovery of the publish queue from its job store.

use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::QueueError;
use crate::domain::entities::PublishJob;
use crate::domain::types::{JobOutcome, JobState};

use super::config::PersistenceMode;
use super::queue::PublishQueue;
use super::resolver::ResourceResolver;

/// What [`PublishQueue::initialize`] did with the stored jobs.
#[derive(Debug, Default)]
pub struct RevivalReport {
    /// Waiting jobs re-admitted to the queue.
    pub revived: Vec<Uuid>,
    /// Jobs that were running when the process stopped, now finished as abandoned.
    pub finalized: Vec<Uuid>,
    /// Finished jobs restored to history.
    pub restored_history: usize,
    /// Jobs that could not be revived; they have been deleted from the store.
    pub dropped: Vec<QueueError>,
}

impl RevivalReport {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
    }
}

impl PublishQueue {
    /// Opens the queue for use, optionally replaying the job store first.
    ///
    /// Must be called exactly once before any other mutating operation. Stored jobs are
    /// processed oldest first: waiting jobs get their resources re-resolved and are queued
    /// again, jobs caught mid-publish are finished as abandoned, finished jobs fill the
    /// history.
    #[instrument(skip(self, resolver))]
    pub async fn initialize(
        &self,
        resolver: &dyn ResourceResolver,
        revive: bool,
    ) -> Result<RevivalReport, QueueError> {
        self.begin_initialize()?;
        let result = self.revive(resolver, revive).await;
        self.end_initialize(result.is_ok());

        if let Ok(report) = &result {
            info!(
                revived = report.revived.len(),
                finalized = report.finalized.len(),
                restored_history = report.restored_history,
                dropped = report.dropped.len(),
                "Publish queue initialized"
            );
        }
        result
    }

    async fn revive(
        &self,
        resolver: &dyn ResourceResolver,
        revive: bool,
    ) -> Result<RevivalReport, QueueError> {
        let mut report = RevivalReport::default();
        if !revive {
            return Ok(report);
        }
        let Some(store) = self.active_store() else {
            return Ok(report);
        };

        let now = OffsetDateTime::now_utc();
        let since = self.config().revival_window.and_then(|window| window_start(now, window));
        let stored = match store.read_all(since, self.config().revival_limit).await {
            Ok(stored) => stored,
            Err(source) => {
                counter!("flexcache_job_persist_failed_total").increment(1);
                warn!(error = %source, "Reading stored publish jobs failed");
                if self.config().persistence == PersistenceMode::Strict {
                    return Err(QueueError::persistence("read_all", source));
                }
                return Ok(report);
            }
        };

        for job in stored {
            match job.state {
                JobState::Enqueued => match self.revive_waiting(resolver, job).await {
                    Ok(id) => report.revived.push(id),
                    Err(err) => report.dropped.push(err),
                },
                JobState::Started => report.finalized.push(self.finalize_interrupted(job, now).await),
                JobState::Finished => {
                    self.restore_history(job);
                    report.restored_history += 1;
                }
            }
        }
        Ok(report)
    }

    async fn revive_waiting(
        &self,
        resolver: &dyn ResourceResolver,
        mut job: PublishJob,
    ) -> Result<Uuid, QueueError> {
        let id = job.id;
        let outcome = match resolver.resolve(&job).await {
            Ok(resources) => {
                job.resources = resources;
                job.locked = true;
                self.admit_revived(job.clone())
            }
            Err(source) => Err(QueueError::revival(id, source)),
        };

        match outcome {
            Ok(()) => {
                for observer in self.observers() {
                    observer.job_enqueued(&job).await;
                }
                Ok(id)
            }
            Err(err) => {
                warn!(job_id = %id, error = %err, "Dropping publish job that cannot be revived");
                if let Some(store) = self.active_store()
                    && let Err(source) = store.delete(id).await
                {
                    counter!("flexcache_job_persist_failed_total").increment(1);
                    warn!(job_id = %id, error = %source, "Deleting unrevivable job failed");
                }
                Err(err)
            }
        }
    }

    async fn finalize_interrupted(&self, mut job: PublishJob, now: OffsetDateTime) -> Uuid {
        let id = job.id;
        // Started -> Finished is always allowed; the job's state was read from the store.
        if let Err(err) = job.finish(now, JobOutcome::Abandoned) {
            warn!(job_id = %id, error = %err, "Stored job has an inconsistent state");
        }
        job.locked = false;
        self.restore_history(job.clone());

        for observer in self.observers() {
            observer.release_locks(&job).await;
        }
        if let Some(store) = self.active_store()
            && let Err(source) = store.update(&job).await
        {
            counter!("flexcache_job_persist_failed_total").increment(1);
            warn!(job_id = %id, error = %source, "Persisting finalized job failed");
        }
        info!(job_id = %id, "Finalized publish job interrupted by shutdown");
        id
    }
}

/// Earliest enqueue time inside `window`. Windows reaching past the representable range
/// impose no bound.
fn window_start(now: OffsetDateTime, window: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(window)
        .ok()
        .and_then(|window| now.checked_sub(window))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::application::error::{ResolveError, StoreError};
    use crate::application::jobs::config::QueueConfig;
    use crate::application::jobs::resolver::StoredResourceResolver;
    use crate::application::jobs::store::{JobStore, MemoryJobStore};

    struct RenamingResolver;

    #[async_trait]
    impl ResourceResolver for RenamingResolver {
        async fn resolve(&self, job: &PublishJob) -> Result<Vec<String>, ResolveError> {
            if job.resources.iter().any(|resource| resource.contains("deleted")) {
                return Err(ResolveError::new(job.id, "resource no longer exists"));
            }
            Ok(job
                .resources
                .iter()
                .map(|resource| format!("/moved{resource}"))
                .collect())
        }
    }

    fn stored(resource: &str, at: OffsetDateTime) -> PublishJob {
        let mut job = PublishJob::new("tester", vec![resource.to_string()]);
        job.enqueued_at = at;
        job.locked = true;
        job
    }

    #[tokio::test]
    async fn revival_restores_every_job_state() {
        let waiting = stored("/a.html", datetime!(2024-05-01 10:00 UTC));
        let mut interrupted = stored("/b.html", datetime!(2024-05-01 09:00 UTC));
        interrupted
            .start(datetime!(2024-05-01 09:01 UTC))
            .expect("start");
        let mut done = stored("/c.html", datetime!(2024-05-01 08:00 UTC));
        done.start(datetime!(2024-05-01 08:01 UTC)).expect("start");
        done.finish(datetime!(2024-05-01 08:02 UTC), JobOutcome::Succeeded)
            .expect("finish");

        let store = Arc::new(MemoryJobStore::with_jobs([
            waiting.clone(),
            interrupted.clone(),
            done.clone(),
        ]));
        let queue = PublishQueue::new(QueueConfig::default(), Some(store.clone()));
        let report = queue
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("initialize");

        assert_eq!(report.revived, vec![waiting.id]);
        assert_eq!(report.finalized, vec![interrupted.id]);
        assert_eq!(report.restored_history, 1);
        assert!(report.is_clean());

        assert_eq!(queue.as_list().len(), 1);
        let history = queue.history();
        assert_eq!(history.len(), 2);
        let finalized = queue.find(interrupted.id).expect("in history");
        assert_eq!(finalized.state, JobState::Finished);
        assert_eq!(finalized.outcome, Some(JobOutcome::Abandoned));
        assert!(!finalized.locked);
        assert_eq!(store.get(interrupted.id), Some(finalized));
    }

    #[tokio::test]
    async fn unresolvable_jobs_are_dropped_and_deleted() {
        let ok = stored("/a.html", datetime!(2024-05-01 10:00 UTC));
        let gone = stored("/deleted.html", datetime!(2024-05-01 11:00 UTC));
        let store = Arc::new(MemoryJobStore::with_jobs([ok.clone(), gone.clone()]));
        let queue = PublishQueue::new(QueueConfig::default(), Some(store.clone()));

        let report = queue
            .initialize(&RenamingResolver, true)
            .await
            .expect("initialize");

        assert_eq!(report.revived, vec![ok.id]);
        assert!(matches!(
            report.dropped.as_slice(),
            [QueueError::JobRevivalFailed { job, .. }] if *job == gone.id
        ));
        assert!(store.get(gone.id).is_none());
        assert_eq!(queue.as_list()[0].resources, vec!["/moved/a.html".to_string()]);
    }

    #[tokio::test]
    async fn revival_window_skips_old_jobs() {
        let old = stored("/old.html", OffsetDateTime::now_utc() - time::Duration::days(10));
        let recent = stored("/new.html", OffsetDateTime::now_utc() - time::Duration::hours(1));
        let store = Arc::new(MemoryJobStore::with_jobs([old, recent.clone()]));
        let config = QueueConfig {
            revival_window: Some(std::time::Duration::from_secs(24 * 60 * 60)),
            ..Default::default()
        };
        let queue = PublishQueue::new(config, Some(store));

        let report = queue
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("initialize");
        assert_eq!(report.revived, vec![recent.id]);
    }

    #[tokio::test]
    async fn pending_jobs_survive_a_history_larger_than_the_revival_limit() {
        let store = Arc::new(MemoryJobStore::new());
        let config = QueueConfig {
            revival_limit: 3,
            ..Default::default()
        };

        let first = PublishQueue::new(config.clone(), Some(store.clone()));
        first
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("initialize");
        for i in 0..3 {
            first
                .enqueue(PublishJob::new("tester", vec![format!("/{i}.html")]))
                .await
                .expect("enqueue");
            let started = first.next().await.expect("next").expect("job");
            first
                .finish(started.id, JobOutcome::Succeeded)
                .await
                .expect("finish");
        }
        let waiting = PublishJob::new("tester", vec!["/late.html".into()]);
        first.enqueue(waiting.clone()).await.expect("enqueue");
        assert_eq!(store.len(), 4);

        let restarted = PublishQueue::new(config, Some(store));
        let report = restarted
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("revive");

        assert_eq!(report.revived, vec![waiting.id]);
        assert_eq!(report.restored_history, 3);
        assert_eq!(restarted.len(), 1);
    }

    #[tokio::test]
    async fn unbounded_revival_window_reads_everything() {
        let old = stored("/old.html", datetime!(2000-01-01 00:00 UTC));
        let store = Arc::new(MemoryJobStore::with_jobs([old.clone()]));
        let config = QueueConfig {
            revival_window: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let queue = PublishQueue::new(config, Some(store));

        let report = queue
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("initialize");
        assert_eq!(report.revived, vec![old.id]);
    }

    struct UnreadableStore;

    #[async_trait]
    impl JobStore for UnreadableStore {
        async fn create(&self, _: &PublishJob) -> Result<(), StoreError> {
            Ok(())
        }

        async fn update(&self, _: &PublishJob) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _: Uuid) -> Result<(), StoreError> {
            Ok(())
        }

        async fn read_all(
            &self,
            _: Option<OffsetDateTime>,
            _: usize,
        ) -> Result<Vec<PublishJob>, StoreError> {
            Err(StoreError::unavailable("store offline"))
        }
    }

    #[tokio::test]
    async fn unreadable_store_only_fails_strict_queues() {
        let lenient = PublishQueue::new(QueueConfig::default(), Some(Arc::new(UnreadableStore)));
        lenient
            .initialize(&StoredResourceResolver, true)
            .await
            .expect("best effort keeps going");
        assert!(lenient.is_ready());

        let strict = PublishQueue::new(
            QueueConfig {
                persistence: PersistenceMode::Strict,
                ..Default::default()
            },
            Some(Arc::new(UnreadableStore)),
        );
        let err = strict
            .initialize(&StoredResourceResolver, true)
            .await
            .expect_err("strict read failure");
        assert!(matches!(
            err,
            QueueError::PersistenceFailed { op: "read_all", .. }
        ));
        assert!(!strict.is_ready());
    }

    #[tokio::test]
    async fn initialize_without_revive_ignores_the_store() {
        let store = Arc::new(MemoryJobStore::with_jobs([stored(
            "/a.html",
            datetime!(2024-05-01 10:00 UTC),
        )]));
        let queue = PublishQueue::new(QueueConfig::default(), Some(store));

        let report = queue
            .initialize(&StoredResourceResolver, false)
            .await
            .expect("initialize");
        assert!(report.revived.is_empty());
        assert!(queue.is_empty());
        assert!(queue.is_ready());
    }
}
