//! In-memory publish queue with optional write-through to a [`JobStore`].
//!
//! Pending jobs are claimed strictly in FIFO order. Every job sits in exactly one of
//! pending, running or history; moving it between them happens under one mutex, while
//! store I/O and observer callbacks happen after the mutex is released.
//!
//! Mutating operations are serialized by an async transition lock held across their
//! store write, so the store sees each job's changes in the order the queue made them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::Mutex as AsyncMutex;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::error::QueueError;
use crate::cache::lock::mutex_lock;
use crate::domain::entities::PublishJob;
use crate::domain::error::DomainError;
use crate::domain::types::{JobOutcome, JobState};

use super::config::{PersistenceMode, QueueConfig};
use super::observer::QueueObserver;
use super::store::JobStore;

const SOURCE: &str = "application::jobs::queue";

/// What happened to the durable copy of a job after an in-memory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Persisted,
    /// Persistence is disabled or no store is configured.
    NotRequired,
    /// The store failed; the in-memory queue holds the only copy.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub history: usize,
}

#[derive(Debug, Clone, Copy)]
enum StoreOp {
    Create,
    Update,
    Delete,
}

impl StoreOp {
    fn as_str(self) -> &'static str {
        match self {
            StoreOp::Create => "create",
            StoreOp::Update => "update",
            StoreOp::Delete => "delete",
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PublishJob>,
    running: HashMap<Uuid, PublishJob>,
    history: VecDeque<PublishJob>,
}

impl QueueState {
    fn state_of(&self, id: Uuid) -> Option<JobState> {
        if self.pending.iter().any(|job| job.id == id) {
            Some(JobState::Enqueued)
        } else if self.running.contains_key(&id) {
            Some(JobState::Started)
        } else if self.history.iter().any(|job| job.id == id) {
            Some(JobState::Finished)
        } else {
            None
        }
    }

    fn push_history(&mut self, job: PublishJob, limit: usize) {
        self.history.push_back(job);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

pub struct PublishQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    transitions: AsyncMutex<()>,
    store: Option<Arc<dyn JobStore>>,
    observers: Vec<Arc<dyn QueueObserver>>,
    ready: AtomicBool,
    initializing: AtomicBool,
}

impl PublishQueue {
    pub fn new(config: QueueConfig, store: Option<Arc<dyn JobStore>>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            transitions: AsyncMutex::new(()),
            store,
            observers: Vec::new(),
            ready: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Adds a job to the end of the queue and takes publish locks on its resources.
    ///
    /// A store failure never drops the job from memory: best-effort queues report
    /// [`Durability::Degraded`], strict queues return [`QueueError::PersistenceFailed`].
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn enqueue(&self, mut job: PublishJob) -> Result<Durability, QueueError> {
        self.ensure_ready()?;
        let _transition = self.transitions.lock().await;
        if job.state != JobState::Enqueued {
            return Err(DomainError::invalid_transition(job.id, job.state, JobState::Enqueued).into());
        }

        job.enqueued_at = OffsetDateTime::now_utc();
        job.locked = true;
        {
            let mut state = mutex_lock(&self.state, SOURCE, "enqueue");
            if state.state_of(job.id).is_some() {
                return Err(QueueError::invalid_state(format!(
                    "job `{}` is already known to the queue",
                    job.id
                )));
            }
            state.pending.push_back(job.clone());
            record_depth(&state);
        }
        info!(resources = job.resources.len(), "Publish job enqueued");

        for observer in &self.observers {
            observer.job_enqueued(&job).await;
        }
        self.write_through(StoreOp::Create, &job).await
    }

    /// Claims the oldest pending job and marks it as started.
    ///
    /// Concurrent callers never receive the same job.
    pub async fn next(&self) -> Result<Option<PublishJob>, QueueError> {
        self.ensure_ready()?;
        let _transition = self.transitions.lock().await;
        let job = {
            let mut state = mutex_lock(&self.state, SOURCE, "next");
            let Some(mut job) = state.pending.pop_front() else {
                return Ok(None);
            };
            if let Err(err) = job.start(OffsetDateTime::now_utc()) {
                state.pending.push_front(job);
                return Err(err.into());
            }
            state.running.insert(job.id, job.clone());
            record_depth(&state);
            job
        };
        debug!(job_id = %job.id, "Publish job started");

        for observer in &self.observers {
            observer.job_started(&job).await;
        }
        if let Err(err) = self.write_through(StoreOp::Update, &job).await {
            debug!(job_id = %job.id, error = %err, "Continuing after job store failure");
        }
        Ok(Some(job))
    }

    /// Finishes a running job, releasing its locks and moving it to history.
    #[instrument(skip(self, outcome), fields(job_id = %id))]
    pub async fn finish(&self, id: Uuid, outcome: JobOutcome) -> Result<PublishJob, QueueError> {
        self.ensure_ready()?;
        let _transition = self.transitions.lock().await;
        let job = {
            let mut state = mutex_lock(&self.state, SOURCE, "finish");
            let Some(mut job) = state.running.remove(&id) else {
                return Err(match state.state_of(id) {
                    Some(current) => DomainError::invalid_transition(id, current, JobState::Finished).into(),
                    None => QueueError::UnknownJob(id),
                });
            };
            job.finish(OffsetDateTime::now_utc(), outcome)?;
            state.push_history(job.clone(), self.config.history_limit);
            job
        };
        info!(outcome = ?job.outcome, "Publish job finished");

        for observer in &self.observers {
            observer.release_locks(&job).await;
            observer.job_finished(&job).await;
        }
        self.write_through(StoreOp::Update, &job).await?;
        Ok(job)
    }

    /// Cancels a pending or running job.
    ///
    /// A running job's work is not interrupted; only its bookkeeping and locks go away.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn remove(&self, id: Uuid) -> Result<PublishJob, QueueError> {
        self.ensure_ready()?;
        let _transition = self.transitions.lock().await;
        let mut job = {
            let mut state = mutex_lock(&self.state, SOURCE, "remove");
            let pending = state
                .pending
                .iter()
                .position(|job| job.id == id)
                .and_then(|position| state.pending.remove(position));
            let removed = match pending {
                Some(job) => job,
                None => match state.running.remove(&id) {
                    Some(job) => job,
                    None if state.state_of(id).is_some() => {
                        return Err(QueueError::invalid_state(format!(
                            "job `{id}` has already finished"
                        )));
                    }
                    None => return Err(QueueError::UnknownJob(id)),
                },
            };
            record_depth(&state);
            removed
        };
        job.locked = false;
        info!(state = %job.state, "Publish job removed");

        for observer in &self.observers {
            observer.release_locks(&job).await;
            observer.job_removed(&job).await;
        }
        self.write_through(StoreOp::Delete, &job).await?;
        Ok(job)
    }

    /// Finishes every running job started more than `timeout` ago as abandoned.
    pub async fn abandon_overdue(&self, timeout: Duration) -> Result<Vec<PublishJob>, QueueError> {
        self.ensure_ready()?;
        let _transition = self.transitions.lock().await;
        let now = OffsetDateTime::now_utc();
        let abandoned = {
            let mut state = mutex_lock(&self.state, SOURCE, "abandon_overdue");
            let overdue: Vec<Uuid> = state
                .running
                .values()
                .filter(|job| job.is_overdue(now, timeout))
                .map(|job| job.id)
                .collect();

            let mut abandoned = Vec::with_capacity(overdue.len());
            for id in overdue {
                let Some(mut job) = state.running.remove(&id) else {
                    continue;
                };
                job.finish(now, JobOutcome::Abandoned)?;
                state.push_history(job.clone(), self.config.history_limit);
                abandoned.push(job);
            }
            abandoned
        };

        for job in &abandoned {
            warn!(job_id = %job.id, started_at = ?job.started_at, "Abandoning overdue publish job");
            for observer in &self.observers {
                observer.release_locks(job).await;
                observer.job_finished(job).await;
            }
            if let Err(err) = self.write_through(StoreOp::Update, job).await {
                debug!(job_id = %job.id, error = %err, "Continuing after job store failure");
            }
        }
        Ok(abandoned)
    }

    /// Pending jobs, oldest first.
    pub fn as_list(&self) -> Vec<PublishJob> {
        mutex_lock(&self.state, SOURCE, "as_list")
            .pending
            .iter()
            .cloned()
            .collect()
    }

    /// Running jobs, earliest started first.
    pub fn running(&self) -> Vec<PublishJob> {
        let mut running: Vec<_> = mutex_lock(&self.state, SOURCE, "running")
            .running
            .values()
            .cloned()
            .collect();
        running.sort_by_key(|job| job.started_at);
        running
    }

    /// Finished jobs, oldest first.
    pub fn history(&self) -> Vec<PublishJob> {
        mutex_lock(&self.state, SOURCE, "history")
            .history
            .iter()
            .cloned()
            .collect()
    }

    pub fn find(&self, id: Uuid) -> Option<PublishJob> {
        let state = mutex_lock(&self.state, SOURCE, "find");
        state
            .pending
            .iter()
            .chain(state.history.iter())
            .find(|job| job.id == id)
            .or_else(|| state.running.get(&id))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        mutex_lock(&self.state, SOURCE, "is_empty").pending.is_empty()
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").pending.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = mutex_lock(&self.state, SOURCE, "stats");
        QueueStats {
            queued: state.pending.len(),
            running: state.running.len(),
            history: state.history.len(),
        }
    }

    pub(super) fn active_store(&self) -> Option<&Arc<dyn JobStore>> {
        if self.config.persistence.is_enabled() {
            self.store.as_ref()
        } else {
            None
        }
    }

    pub(super) fn observers(&self) -> &[Arc<dyn QueueObserver>] {
        &self.observers
    }

    /// Claims the one-time initialization slot.
    pub(super) fn begin_initialize(&self) -> Result<(), QueueError> {
        if self.is_ready() || self.initializing.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyInitialized);
        }
        Ok(())
    }

    pub(super) fn end_initialize(&self, succeeded: bool) {
        if succeeded {
            self.ready.store(true, Ordering::Release);
        } else {
            self.initializing.store(false, Ordering::Release);
        }
    }

    /// Re-admits a stored job that was still waiting when the process stopped.
    pub(super) fn admit_revived(&self, job: PublishJob) -> Result<(), QueueError> {
        let mut state = mutex_lock(&self.state, SOURCE, "admit_revived");
        if state.state_of(job.id).is_some() {
            return Err(QueueError::invalid_state(format!(
                "job `{}` was stored twice",
                job.id
            )));
        }
        state.pending.push_back(job);
        record_depth(&state);
        Ok(())
    }

    pub(super) fn restore_history(&self, job: PublishJob) {
        let mut state = mutex_lock(&self.state, SOURCE, "restore_history");
        if state.state_of(job.id).is_none() {
            state.push_history(job, self.config.history_limit);
        }
    }

    fn ensure_ready(&self) -> Result<(), QueueError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(QueueError::NotReady)
        }
    }

    async fn write_through(&self, op: StoreOp, job: &PublishJob) -> Result<Durability, QueueError> {
        let Some(store) = self.active_store() else {
            return Ok(Durability::NotRequired);
        };

        let result = match op {
            StoreOp::Create => store.create(job).await,
            StoreOp::Update => store.update(job).await,
            StoreOp::Delete => store.delete(job.id).await,
        };

        match result {
            Ok(()) => Ok(Durability::Persisted),
            Err(source) => {
                counter!("flexcache_job_persist_failed_total").increment(1);
                warn!(
                    job_id = %job.id,
                    op = op.as_str(),
                    error = %source,
                    "Job store write failed"
                );
                match self.config.persistence {
                    PersistenceMode::Strict => Err(QueueError::persistence(op.as_str(), source)),
                    _ => Ok(Durability::Degraded),
                }
            }
        }
    }
}

fn record_depth(state: &QueueState) {
    gauge!("flexcache_queue_depth").set(state.pending.len() as f64);
}
