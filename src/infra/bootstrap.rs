//! One-time construction of the handles shared by request handlers and workers.

use std::{fmt, path::Path, sync::Arc};

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use tracing::{info, warn};

use crate::application::repos::BookDatabase;
use crate::config::{PubsubSettings, RuntimeEnv, Settings};

use super::{
    db::{BackendFactory, CloudBackends, open_database},
    error::InfraError,
    oauth::OAuthConfig,
    pubsub::{PubsubClient, PubsubError, TopicStatus, configure_pubsub},
    session::SessionStore,
    storage::StorageBucket,
    telemetry::StepTimer,
};

pub const STARTUP_TARGET: &str = "bookshelf::startup";

/// Handles built once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub db: Arc<dyn BookDatabase>,
    pub storage: Option<StorageBucket>,
    pub oauth: Option<OAuthConfig>,
    pub sessions: SessionStore,
    pub pubsub: Option<PubsubClient>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("db", &self.db.backend())
            .field("storage", &self.storage)
            .field("oauth", &self.oauth)
            .field("sessions", &self.sessions)
            .field("pubsub", &self.pubsub)
            .finish_non_exhaustive()
    }
}

impl FromRef<AppContext> for Key {
    fn from_ref(context: &AppContext) -> Self {
        context.sessions.key().clone()
    }
}

impl FromRef<AppContext> for SessionStore {
    fn from_ref(context: &AppContext) -> Self {
        context.sessions.clone()
    }
}

impl AppContext {
    pub async fn bootstrap(settings: Settings, env: &RuntimeEnv) -> Result<Self, InfraError> {
        Self::bootstrap_with(settings, env, &CloudBackends).await
    }

    /// Build every handle in order, stopping at the first fatal error.
    pub async fn bootstrap_with(
        settings: Settings,
        env: &RuntimeEnv,
        factory: &dyn BackendFactory,
    ) -> Result<Self, InfraError> {
        let credentials = settings.gcp.credentials_file.as_deref();

        let timer = StepTimer::start("database");
        let db = open_database(&settings.database, env, &settings.gcp, factory).await?;
        info!(
            target: STARTUP_TARGET,
            backend = %db.backend(),
            elapsed_ms = timer.finish(),
            "database ready"
        );

        let storage = match settings.storage.as_ref() {
            Some(storage) => {
                let timer = StepTimer::start("storage");
                let bucket = StorageBucket::open(&storage.bucket, credentials).await?;
                info!(
                    target: STARTUP_TARGET,
                    bucket = bucket.name(),
                    elapsed_ms = timer.finish(),
                    "storage bucket ready"
                );
                Some(bucket)
            }
            None => None,
        };

        let oauth = match settings.oauth.as_ref() {
            Some(oauth) => {
                let timer = StepTimer::start("oauth");
                let config = OAuthConfig::from_settings(oauth, env)?;
                info!(
                    target: STARTUP_TARGET,
                    redirect_url = %config.redirect_url(),
                    elapsed_ms = timer.finish(),
                    "oauth config ready"
                );
                Some(config)
            }
            None => None,
        };

        let timer = StepTimer::start("session");
        let sessions = SessionStore::new(&settings.session)?;
        info!(
            target: STARTUP_TARGET,
            cookie = sessions.cookie_name(),
            elapsed_ms = timer.finish(),
            "session store ready"
        );

        let pubsub = match settings.pubsub.as_ref() {
            Some(pubsub) => open_pubsub(db.as_ref(), pubsub, credentials).await?,
            None => None,
        };

        Ok(Self {
            settings: Arc::new(settings),
            db,
            storage,
            oauth,
            sessions,
            pubsub,
        })
    }

    /// Release the database connections.
    pub async fn shutdown(&self) {
        self.db.close().await;
    }
}

/// Open Pub/Sub, treating an in-memory database as "no client" rather than a failure.
pub async fn open_pubsub(
    db: &dyn BookDatabase,
    settings: &PubsubSettings,
    credentials: Option<&Path>,
) -> Result<Option<PubsubClient>, InfraError> {
    let timer = StepTimer::start("pubsub");
    match configure_pubsub(db, settings, credentials).await {
        Ok((client, status)) => {
            info!(
                target: STARTUP_TARGET,
                project = client.project_id(),
                topic = client.topic_id(),
                created = status == TopicStatus::Created,
                elapsed_ms = timer.finish(),
                "pubsub client ready"
            );
            Ok(Some(client))
        }
        Err(PubsubError::InMemoryDatabase) => {
            timer.finish();
            warn!(
                target: STARTUP_TARGET,
                "continuing without pubsub: the in-memory database is not shared with workers"
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
