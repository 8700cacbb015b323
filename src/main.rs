use std::process;

use bookshelf::{
    application::error::AppError,
    config::{self, RuntimeEnv, Settings},
    infra::{
        bootstrap::{AppContext, STARTUP_TARGET},
        db::{CloudBackends, open_database},
        error::InfraError,
        pubsub::{TopicStatus, configure_pubsub},
        storage::StorageBucket,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args.command.unwrap_or_default();

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let env = RuntimeEnv::capture();

    match command {
        config::Command::Check(_) => run_check(settings, &env).await,
        config::Command::Topic(_) => run_topic(settings, &env).await,
    }
}

async fn run_check(settings: Settings, env: &RuntimeEnv) -> Result<(), AppError> {
    let context = AppContext::bootstrap(settings, env).await?;

    info!(
        target: STARTUP_TARGET,
        backend = %context.db.backend(),
        storage = ?context.storage.as_ref().map(StorageBucket::name),
        oauth = context.oauth.is_some(),
        pubsub = context.pubsub.is_some(),
        production = env.is_production(),
        "startup configuration complete"
    );

    context.shutdown().await;
    Ok(())
}

async fn run_topic(settings: Settings, env: &RuntimeEnv) -> Result<(), AppError> {
    let pubsub = settings
        .pubsub
        .as_ref()
        .ok_or_else(|| AppError::validation("pubsub.project_id is not configured"))?;

    let db = open_database(&settings.database, env, &settings.gcp, &CloudBackends).await?;
    let result = configure_pubsub(
        db.as_ref(),
        pubsub,
        settings.gcp.credentials_file.as_deref(),
    )
    .await;
    db.close().await;

    let (client, status) = result.map_err(InfraError::from)?;
    info!(
        target: STARTUP_TARGET,
        project = client.project_id(),
        topic = client.topic_id(),
        created = status == TopicStatus::Created,
        "pubsub topic ready"
    );
    Ok(())
}
