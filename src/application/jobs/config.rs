//! Publish queue configuration.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_REVIVAL_LIMIT: usize = 1_000;

/// How the queue treats a failing job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Jobs live in memory only.
    Disabled,
    /// Store failures are logged and reported, the in-memory queue keeps going.
    #[default]
    BestEffort,
    /// Store failures are returned to the caller as errors.
    Strict,
}

impl PersistenceMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, PersistenceMode::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub persistence: PersistenceMode,
    /// Finished jobs kept in memory, oldest dropped first.
    pub history_limit: usize,
    /// Most stored jobs read back during revival.
    pub revival_limit: usize,
    /// Only jobs enqueued within this window are revived.
    pub revival_window: Option<Duration>,
    /// Started jobs running longer than this are abandoned by the worker.
    pub job_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceMode::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            revival_limit: DEFAULT_REVIVAL_LIMIT,
            revival_window: None,
            job_timeout: None,
        }
    }
}

impl From<&crate::config::QueueSettings> for QueueConfig {
    fn from(settings: &crate::config::QueueSettings) -> Self {
        Self {
            persistence: settings.persistence,
            history_limit: settings.history_limit,
            revival_limit: settings.revival_limit,
            revival_window: settings.revival_window_hours.map(|hours| {
                Duration::from_secs(hours.saturating_mul(60 * 60))
            }),
            job_timeout: settings
                .job_timeout_minutes
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60))),
        }
    }
}
