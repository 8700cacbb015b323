//! Pub/Sub client bound to the book-details topic.

use std::{fmt, path::Path};

use async_trait::async_trait;
use google_cloud_pubsub::{
    client::{Client, ClientConfig, google_cloud_auth::credentials::CredentialsFile},
    topic::Topic,
};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::repos::BookDatabase;
use crate::config::PubsubSettings;

use super::telemetry::PUBSUB_TOPIC_CREATED_TOTAL;

#[derive(Debug, Error)]
pub enum PubsubError {
    /// The selected database keeps its state inside this process.
    #[error("pubsub cannot be used with the in-memory database")]
    InMemoryDatabase,
    #[error("pubsub client error: {0}")]
    Client(String),
    #[error("pubsub topic `{topic}`: {message}")]
    Topic { topic: String, message: String },
}

impl PubsubError {
    fn topic(topic: &str, err: impl fmt::Display) -> Self {
        Self::Topic {
            topic: topic.to_string(),
            message: err.to_string(),
        }
    }
}

/// Topic administration used at startup.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn topic_exists(&self, topic: &str) -> Result<bool, PubsubError>;

    async fn create_topic(&self, topic: &str) -> Result<(), PubsubError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    Existing,
    Created,
}

/// Reject backends whose writes are invisible to other processes.
pub fn ensure_shared_database(db: &dyn BookDatabase) -> Result<(), PubsubError> {
    if db.backend().shares_state_across_processes() {
        Ok(())
    } else {
        Err(PubsubError::InMemoryDatabase)
    }
}

/// Create `topic` unless it already exists.
pub async fn ensure_topic(admin: &dyn TopicAdmin, topic: &str) -> Result<TopicStatus, PubsubError> {
    if admin.topic_exists(topic).await? {
        return Ok(TopicStatus::Existing);
    }

    admin.create_topic(topic).await?;
    counter!(PUBSUB_TOPIC_CREATED_TOTAL).increment(1);
    info!(target: "bookshelf::startup", topic, "created pubsub topic");
    Ok(TopicStatus::Created)
}

#[derive(Clone)]
pub struct PubsubClient {
    client: Client,
    project_id: String,
    topic_id: String,
}

impl fmt::Debug for PubsubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubsubClient")
            .field("project_id", &self.project_id)
            .field("topic_id", &self.topic_id)
            .finish_non_exhaustive()
    }
}

impl PubsubClient {
    /// Build a client for `settings.project_id`. `PUBSUB_EMULATOR_HOST` is honoured by the library.
    pub async fn connect(
        settings: &PubsubSettings,
        credentials: Option<&Path>,
    ) -> Result<Self, PubsubError> {
        let mut config = match credentials {
            Some(path) => {
                let file = CredentialsFile::new_from_file(path.display().to_string())
                    .await
                    .map_err(|err| {
                        PubsubError::Client(format!("{}: {err}", path.display()))
                    })?;
                ClientConfig::default().with_credentials(file).await
            }
            None => ClientConfig::default().with_auth().await,
        }
        .map_err(|err| PubsubError::Client(err.to_string()))?;
        config.project_id = Some(settings.project_id.clone());

        let client = Client::new(config)
            .await
            .map_err(|err| PubsubError::Client(err.to_string()))?;

        Ok(Self {
            client,
            project_id: settings.project_id.clone(),
            topic_id: settings.topic.clone(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Handle for publishing to the configured topic.
    pub fn topic(&self) -> Topic {
        self.client.topic(&self.topic_id)
    }
}

#[async_trait]
impl TopicAdmin for PubsubClient {
    async fn topic_exists(&self, topic: &str) -> Result<bool, PubsubError> {
        self.client
            .topic(topic)
            .exists(None)
            .await
            .map_err(|err| PubsubError::topic(topic, err))
    }

    async fn create_topic(&self, topic: &str) -> Result<(), PubsubError> {
        self.client
            .topic(topic)
            .create(None, None)
            .await
            .map_err(|err| PubsubError::topic(topic, err))
    }
}

/// Open the Pub/Sub client and make sure its topic exists.
///
/// The database check runs first, so an in-memory backend never causes network traffic.
pub async fn configure_pubsub(
    db: &dyn BookDatabase,
    settings: &PubsubSettings,
    credentials: Option<&Path>,
) -> Result<(PubsubClient, TopicStatus), PubsubError> {
    if let Err(err) = ensure_shared_database(db) {
        warn!(
            target: "bookshelf::startup",
            backend = %db.backend(),
            "pubsub requested with a process-local database"
        );
        return Err(err);
    }

    let client = PubsubClient::connect(settings, credentials).await?;
    let status = ensure_topic(&client, &settings.topic).await?;
    Ok((client, status))
}
