use thiserror::Error;
use uuid::Uuid;

use super::types::JobState;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("job `{job}` cannot move from {from} to {to}")]
    InvalidTransition {
        job: Uuid,
        from: JobState,
        to: JobState,
    },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn invalid_transition(job: Uuid, from: JobState, to: JobState) -> Self {
        Self::InvalidTransition { job, from, to }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
