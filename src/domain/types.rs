//! Shared domain enumerations for publish jobs.

use serde::{Deserialize, Serialize};

/// Position of a publish job in its lifecycle.
///
/// Jobs only move forward: `Enqueued -> Started -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Enqueued,
    Started,
    Finished,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Enqueued => "enqueued",
            JobState::Started => "started",
            JobState::Finished => "finished",
        }
    }

    /// Returns true when a job in `self` may move to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Enqueued, JobState::Started) | (JobState::Started, JobState::Finished)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { message: String },
    /// The job was running when the process stopped, or it overran its timeout.
    Abandoned,
}

impl JobOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
