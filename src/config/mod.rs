//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{fmt, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::repos::BackendKind;

mod cli;
mod runtime;

pub use cli::{CheckArgs, CliArgs, Command, Overrides, TopicArgs};
pub use runtime::{
    DATASTORE_EMULATOR_HOST_VAR, GAE_INSTANCE_VAR, OAUTH2_CALLBACK_VAR, RuntimeEnv,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "bookshelf";
const ENV_PREFIX: &str = "BOOKSHELF";
const DEFAULT_MYSQL_HOST: &str = "localhost";
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_MYSQL_DATABASE: &str = "library";
const DEFAULT_MYSQL_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MONGO_ADDRESS: &str = "localhost";
const DEFAULT_MONGO_DATABASE: &str = "bookshelf";
const DEFAULT_SESSION_COOKIE_NAME: &str = "bookshelf-session";
pub const DEFAULT_PUBSUB_TOPIC: &str = "fill-book-details";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseBackend,
    pub storage: Option<StorageSettings>,
    pub oauth: Option<OAuthSettings>,
    pub session: SessionSettings,
    pub pubsub: Option<PubsubSettings>,
    pub gcp: GcpSettings,
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

/// The single book storage backend the process runs against.
#[derive(Debug, Clone)]
pub enum DatabaseBackend {
    Memory,
    MySql(MySqlSettings),
    Mongo(MongoSettings),
    Datastore(DatastoreSettings),
}

impl DatabaseBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            DatabaseBackend::Memory => BackendKind::Memory,
            DatabaseBackend::MySql(_) => BackendKind::MySql,
            DatabaseBackend::Mongo(_) => BackendKind::Mongo,
            DatabaseBackend::Datastore(_) => BackendKind::Datastore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MySqlSettings {
    pub username: String,
    pub password: SecretString,
    /// Cloud SQL connection name, `project:region:instance`.
    pub instance: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct MongoSettings {
    pub address: String,
    pub credential: Option<MongoCredential>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct MongoCredential {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct DatastoreSettings {
    pub project_id: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secret: SecretString,
    pub cookie_name: String,
    /// `None` issues browser-session cookies without `Max-Age`.
    pub max_age: Option<Duration>,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct PubsubSettings {
    pub project_id: String,
    pub topic: String,
}

#[derive(Debug, Clone, Default)]
pub struct GcpSettings {
    /// Service-account key used by storage, Pub/Sub and Datastore.
    pub credentials_file: Option<PathBuf>,
}

/// A configuration value that must never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(command) = cli.command.as_ref() {
        raw.apply_overrides(command.overrides());
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
    database: RawDatabaseSettings,
    storage: RawStorageSettings,
    oauth: RawOAuthSettings,
    session: RawSessionSettings,
    pubsub: RawPubsubSettings,
    gcp: RawGcpSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.database_backend.as_ref() {
            self.database.backend = Some(backend.clone());
        }
        if let Some(bucket) = overrides.storage_bucket.as_ref() {
            self.storage.bucket = Some(bucket.clone());
        }
        if let Some(project) = overrides.pubsub_project.as_ref() {
            self.pubsub.project_id = Some(project.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            storage,
            oauth,
            session,
            pubsub,
            gcp,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_backend(database)?;
        let storage = build_storage_settings(storage);
        let oauth = build_oauth_settings(oauth)?;
        let session = build_session_settings(session)?;
        let pubsub = build_pubsub_settings(pubsub)?;
        let gcp = build_gcp_settings(gcp)?;

        Ok(Self {
            logging,
            database,
            storage,
            oauth,
            session,
            pubsub,
            gcp,
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

fn parse_backend(value: &str) -> Result<BackendKind, LoadError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" | "in-memory" | "inmemory" => Ok(BackendKind::Memory),
        "mysql" | "cloudsql" | "cloud-sql" => Ok(BackendKind::MySql),
        "mongo" | "mongodb" => Ok(BackendKind::Mongo),
        "datastore" | "cloud-datastore" => Ok(BackendKind::Datastore),
        other => Err(LoadError::invalid(
            "database.backend",
            format!("unknown backend `{other}`; expected memory, mysql, mongo or datastore"),
        )),
    }
}

fn build_database_backend(database: RawDatabaseSettings) -> Result<DatabaseBackend, LoadError> {
    let backend = database.backend.as_deref().map(str::trim).unwrap_or("");
    if backend.is_empty() {
        return Err(LoadError::invalid(
            "database.backend",
            "a backend must be selected explicitly (memory, mysql, mongo or datastore)",
        ));
    }

    match parse_backend(backend)? {
        BackendKind::Memory => Ok(DatabaseBackend::Memory),
        BackendKind::MySql => build_mysql_settings(database.mysql).map(DatabaseBackend::MySql),
        BackendKind::Mongo => build_mongo_settings(database.mongo).map(DatabaseBackend::Mongo),
        BackendKind::Datastore => {
            let project_id = required(database.datastore.project_id, "database.datastore.project_id")?;
            Ok(DatabaseBackend::Datastore(DatastoreSettings { project_id }))
        }
    }
}

fn build_mysql_settings(mysql: RawMySqlSettings) -> Result<MySqlSettings, LoadError> {
    let username = required(mysql.username, "database.mysql.username")?;
    let instance = required(mysql.instance, "database.mysql.instance")?;
    if instance.split(':').count() != 3 {
        return Err(LoadError::invalid(
            "database.mysql.instance",
            format!("`{instance}` is not a connection name of the form project:region:instance"),
        ));
    }

    let host = optional(mysql.host).unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string());
    let port = mysql.port.unwrap_or(DEFAULT_MYSQL_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "database.mysql.port",
            "port must be greater than zero",
        ));
    }

    let database = optional(mysql.database).unwrap_or_else(|| DEFAULT_MYSQL_DATABASE.to_string());
    if !database
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(LoadError::invalid(
            "database.mysql.database",
            "schema name may only contain ASCII letters, digits and underscores",
        ));
    }

    let max_connections = non_zero_u32(
        mysql
            .max_connections
            .unwrap_or(DEFAULT_MYSQL_MAX_CONNECTIONS)
            .into(),
        "database.mysql.max_connections",
    )?;

    Ok(MySqlSettings {
        username,
        password: SecretString::new(mysql.password.unwrap_or_default()),
        instance,
        host,
        port,
        database,
        max_connections,
    })
}

fn build_mongo_settings(mongo: RawMongoSettings) -> Result<MongoSettings, LoadError> {
    let address = optional(mongo.address).unwrap_or_else(|| DEFAULT_MONGO_ADDRESS.to_string());
    let database = optional(mongo.database).unwrap_or_else(|| DEFAULT_MONGO_DATABASE.to_string());

    let credential = match (optional(mongo.username), mongo.password) {
        (Some(username), Some(password)) => Some(MongoCredential {
            username,
            password: SecretString::new(password),
        }),
        (None, None) => None,
        (Some(_), None) | (None, Some(_)) => {
            return Err(LoadError::invalid(
                "database.mongo.username",
                "username and password must be provided together",
            ));
        }
    };

    Ok(MongoSettings {
        address,
        credential,
        database,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Option<StorageSettings> {
    optional(storage.bucket).map(|bucket| StorageSettings { bucket })
}

fn build_oauth_settings(oauth: RawOAuthSettings) -> Result<Option<OAuthSettings>, LoadError> {
    let redirect_url = optional(oauth.redirect_url);
    match (optional(oauth.client_id), optional(oauth.client_secret)) {
        (Some(client_id), Some(client_secret)) => Ok(Some(OAuthSettings {
            client_id,
            client_secret: SecretString::new(client_secret),
            redirect_url,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(LoadError::invalid(
            "oauth.client_secret",
            "client secret is required when a client id is configured",
        )),
        (None, Some(_)) => Err(LoadError::invalid(
            "oauth.client_id",
            "client id is required when a client secret is configured",
        )),
    }
}

fn build_session_settings(session: RawSessionSettings) -> Result<SessionSettings, LoadError> {
    let secret = required(session.secret, "session.secret")?;
    let cookie_name =
        optional(session.cookie_name).unwrap_or_else(|| DEFAULT_SESSION_COOKIE_NAME.to_string());

    let max_age = session
        .max_age_seconds
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(SessionSettings {
        secret: SecretString::new(secret),
        cookie_name,
        max_age,
        secure: session.secure.unwrap_or(false),
    })
}

fn build_pubsub_settings(pubsub: RawPubsubSettings) -> Result<Option<PubsubSettings>, LoadError> {
    let Some(project_id) = optional(pubsub.project_id) else {
        return Ok(None);
    };
    let topic = optional(pubsub.topic).unwrap_or_else(|| DEFAULT_PUBSUB_TOPIC.to_string());
    if topic.len() < 3 || topic.starts_with("goog") {
        return Err(LoadError::invalid(
            "pubsub.topic",
            format!("`{topic}` is not a valid topic id"),
        ));
    }

    Ok(Some(PubsubSettings { project_id, topic }))
}

fn build_gcp_settings(gcp: RawGcpSettings) -> Result<GcpSettings, LoadError> {
    if let Some(path) = gcp.credentials_file.as_ref()
        && path.as_os_str().is_empty()
    {
        return Err(LoadError::invalid(
            "gcp.credentials_file",
            "path must not be empty",
        ));
    }

    Ok(GcpSettings {
        credentials_file: gcp.credentials_file,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    backend: Option<String>,
    mysql: RawMySqlSettings,
    mongo: RawMongoSettings,
    datastore: RawDatastoreSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMySqlSettings {
    username: Option<String>,
    password: Option<String>,
    instance: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMongoSettings {
    address: Option<String>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatastoreSettings {
    project_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    bucket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOAuthSettings {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    secret: Option<String>,
    cookie_name: Option<String>,
    max_age_seconds: Option<u64>,
    secure: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPubsubSettings {
    project_id: Option<String>,
    topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGcpSettings {
    credentials_file: Option<PathBuf>,
}

fn optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    optional(value).ok_or_else(|| LoadError::invalid(key, "value is required"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
