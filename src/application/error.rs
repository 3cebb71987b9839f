use std::error::Error as StdError;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::error::DomainError;

/// Flattened error chain, used when an error has to be reported as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("job record could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Error)]
#[error("resources of job `{job}` could not be resolved: {reason}")]
pub struct ResolveError {
    pub job: Uuid,
    pub reason: String,
}

impl ResolveError {
    pub fn new(job: Uuid, reason: impl Into<String>) -> Self {
        Self {
            job,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("publish queue has not been initialized")]
    NotReady,
    #[error("publish queue is already initialized")]
    AlreadyInitialized,
    #[error("unknown publish job `{0}`")]
    UnknownJob(Uuid),
    #[error(transparent)]
    InvalidJobState(#[from] DomainError),
    #[error("job store {op} failed")]
    PersistenceFailed {
        op: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("publish job `{job}` could not be revived")]
    JobRevivalFailed {
        job: Uuid,
        #[source]
        source: ResolveError,
    },
}

impl QueueError {
    pub fn persistence(op: &'static str, source: StoreError) -> Self {
        Self::PersistenceFailed { op, source }
    }

    pub fn revival(job: Uuid, source: ResolveError) -> Self {
        Self::JobRevivalFailed { job, source }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidJobState(DomainError::invariant(message))
    }
}
