use std::{process, sync::Arc};

use flexcache::{
    application::{
        error::ErrorReport,
        jobs::{JobStore, PublishQueue, QueueConfig, StoredResourceResolver},
    },
    config::{self, Command, InspectArgs, Settings},
    infra::{error::InfraError, job_store::FileJobStore, telemetry},
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Replay(_) => run_replay(settings).await,
        Command::Inspect(args) => run_inspect(settings, args).await,
    }
}

/// Replays the job store exactly as a restarting process would, then reports the result.
///
/// Revival writes back to the store: abandoned jobs are finalized and unresolvable ones
/// deleted, so running this twice reports nothing left to revive the second time.
async fn run_replay(settings: Settings) -> Result<(), InfraError> {
    let store = FileJobStore::open(&settings.store.directory)?;
    info!(
        directory = %store.root().display(),
        persistence = ?settings.queue.persistence,
        "Replaying publish job store"
    );

    let store: Arc<dyn JobStore> = Arc::new(store);
    let queue = PublishQueue::new(QueueConfig::from(&settings.queue), Some(store));
    let report = queue.initialize(&StoredResourceResolver, true).await?;

    let dropped: Vec<ErrorReport> = report
        .dropped
        .iter()
        .map(|err| ErrorReport::from_error("revival", err))
        .collect();

    let summary = json!({
        "revived": report.revived,
        "finalized": report.finalized,
        "restored_history": report.restored_history,
        "dropped": dropped,
        "stats": queue.stats(),
        "pending": queue.as_list(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_inspect(settings: Settings, args: InspectArgs) -> Result<(), InfraError> {
    let store = FileJobStore::open(&settings.store.directory)?;
    let jobs = store.read_all(None, args.limit).await?;
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}
