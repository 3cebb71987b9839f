//! Domain entities mirrored from durable job storage.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;
use super::types::{JobOutcome, JobState};

/// A request to publish a set of resources.
///
/// The `id` is the join key between the in-memory queue and the durable store and doubles
/// as the publish history id handed to resource resolvers during revival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: Uuid,
    pub initiator: String,
    pub state: JobState,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    /// Publish locks on `resources` are held while this is set.
    #[serde(default)]
    pub locked: bool,
    pub resources: Vec<String>,
    #[serde(default)]
    pub outcome: Option<JobOutcome>,
}

impl PublishJob {
    pub fn new(initiator: impl Into<String>, resources: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            initiator: initiator.into(),
            state: JobState::Enqueued,
            enqueued_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
            locked: false,
            resources,
            outcome: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state == JobState::Started
    }

    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }

    /// Moves an enqueued job to `Started`.
    pub fn start(&mut self, at: OffsetDateTime) -> Result<(), DomainError> {
        self.transition(JobState::Started)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Moves a started job to `Finished` and drops its publish locks.
    pub fn finish(&mut self, at: OffsetDateTime, outcome: JobOutcome) -> Result<(), DomainError> {
        self.transition(JobState::Finished)?;
        self.finished_at = Some(at);
        self.outcome = Some(outcome);
        self.locked = false;
        Ok(())
    }

    /// A started job is overdue once it has been running longer than `timeout`.
    ///
    /// A deadline past the representable range is never reached.
    pub fn is_overdue(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        if !self.is_started() {
            return false;
        }
        self.started_at
            .and_then(|started_at| {
                let timeout = time::Duration::try_from(timeout).ok()?;
                started_at.checked_add(timeout)
            })
            .is_some_and(|deadline| deadline < now)
    }

    fn transition(&mut self, next: JobState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.id, self.state, next));
        }
        self.state = next;
        Ok(())
    }
}
