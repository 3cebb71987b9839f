//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::PersistenceMode;

mod cli;

pub use cli::{CliArgs, Command, InspectArgs, ReplayArgs, StoreOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "flexcache";
const DEFAULT_STORE_DIR: &str = "var/publish-jobs";
const DEFAULT_CACHE_CAPACITY_BYTES: usize = 2_000_000;
const DEFAULT_CACHE_EVICT_TO_BYTES: usize = 1_500_000;
const DEFAULT_CACHE_MAX_ENTRY_BYTES: usize = 400_000;
const DEFAULT_QUEUE_HISTORY_LIMIT: usize = 100;
const DEFAULT_QUEUE_REVIVAL_LIMIT: usize = 1_000;
const MAX_CACHE_EXPIRY_INTERVAL_MINUTES: i64 = 366 * 24 * 60;
const MAX_QUEUE_REVIVAL_WINDOW_HOURS: u64 = 10 * 366 * 24;
const MAX_QUEUE_JOB_TIMEOUT_MINUTES: u64 = 366 * 24 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity_bytes: usize,
    pub evict_to_bytes: usize,
    pub max_entry_bytes: usize,
    pub expiry_interval_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub persistence: PersistenceMode,
    pub history_limit: usize,
    pub revival_limit: usize,
    pub revival_window_hours: Option<u64>,
    pub job_timeout_minutes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FLEXCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Replay(args) => raw.apply_replay_overrides(args),
        Command::Inspect(args) => raw.apply_store_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    queue: RawQueueSettings,
    store: RawStoreSettings,
}

impl RawSettings {
    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(directory) = overrides.store_dir.as_ref() {
            self.store.directory = Some(directory.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_replay_overrides(&mut self, args: &ReplayArgs) {
        self.apply_store_overrides(&args.overrides);
        if let Some(mode) = args.persistence.as_ref() {
            self.queue.persistence = Some(mode.clone());
        }
        if let Some(limit) = args.revival_limit {
            self.queue.revival_limit = Some(limit);
        }
        if let Some(hours) = args.revival_window_hours {
            self.queue.revival_window_hours = Some(hours);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            queue,
            store,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let queue = build_queue_settings(queue)?;
        let store = build_store_settings(store)?;

        Ok(Self {
            logging,
            cache,
            queue,
            store,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity_bytes = cache
        .capacity_bytes
        .unwrap_or(DEFAULT_CACHE_CAPACITY_BYTES);
    if capacity_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.capacity_bytes",
            "must be greater than zero",
        ));
    }

    let evict_to_bytes = cache
        .evict_to_bytes
        .unwrap_or(DEFAULT_CACHE_EVICT_TO_BYTES.min(capacity_bytes));
    if evict_to_bytes > capacity_bytes {
        return Err(LoadError::invalid(
            "cache.evict_to_bytes",
            format!("must not exceed cache.capacity_bytes ({capacity_bytes})"),
        ));
    }

    let max_entry_bytes = cache
        .max_entry_bytes
        .unwrap_or(DEFAULT_CACHE_MAX_ENTRY_BYTES.min(capacity_bytes));
    if max_entry_bytes == 0 || max_entry_bytes > capacity_bytes {
        return Err(LoadError::invalid(
            "cache.max_entry_bytes",
            format!("must be between 1 and cache.capacity_bytes ({capacity_bytes})"),
        ));
    }

    if let Some(minutes) = cache.expiry_interval_minutes
        && !(1..=MAX_CACHE_EXPIRY_INTERVAL_MINUTES).contains(&minutes)
    {
        return Err(LoadError::invalid(
            "cache.expiry_interval_minutes",
            format!("must be between 1 and {MAX_CACHE_EXPIRY_INTERVAL_MINUTES}"),
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        capacity_bytes,
        evict_to_bytes,
        max_entry_bytes,
        expiry_interval_minutes: cache.expiry_interval_minutes,
    })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let persistence = match queue.persistence.as_deref().map(str::trim) {
        None | Some("best_effort") => PersistenceMode::BestEffort,
        Some("strict") => PersistenceMode::Strict,
        Some("disabled") => PersistenceMode::Disabled,
        Some(other) => {
            return Err(LoadError::invalid(
                "queue.persistence",
                format!("unknown mode `{other}` (expected disabled|best_effort|strict)"),
            ));
        }
    };

    let revival_limit = queue.revival_limit.unwrap_or(DEFAULT_QUEUE_REVIVAL_LIMIT);
    if revival_limit == 0 {
        return Err(LoadError::invalid(
            "queue.revival_limit",
            "must be greater than zero",
        ));
    }

    if let Some(minutes) = queue.job_timeout_minutes
        && !(1..=MAX_QUEUE_JOB_TIMEOUT_MINUTES).contains(&minutes)
    {
        return Err(LoadError::invalid(
            "queue.job_timeout_minutes",
            format!("must be between 1 and {MAX_QUEUE_JOB_TIMEOUT_MINUTES}"),
        ));
    }

    if let Some(hours) = queue.revival_window_hours
        && hours > MAX_QUEUE_REVIVAL_WINDOW_HOURS
    {
        return Err(LoadError::invalid(
            "queue.revival_window_hours",
            format!("must not exceed {MAX_QUEUE_REVIVAL_WINDOW_HOURS}"),
        ));
    }

    Ok(QueueSettings {
        persistence,
        history_limit: queue.history_limit.unwrap_or(DEFAULT_QUEUE_HISTORY_LIMIT),
        revival_limit,
        revival_window_hours: queue.revival_window_hours,
        job_timeout_minutes: queue.job_timeout_minutes,
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let directory = store
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("store.directory", "must not be empty"));
    }
    Ok(StoreSettings { directory })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    capacity_bytes: Option<usize>,
    evict_to_bytes: Option<usize>,
    max_entry_bytes: Option<usize>,
    expiry_interval_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    persistence: Option<String>,
    history_limit: Option<usize>,
    revival_limit: Option<usize>,
    revival_window_hours: Option<u64>,
    job_timeout_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    directory: Option<PathBuf>,
}
