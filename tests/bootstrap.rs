use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use bookshelf::application::repos::{BackendKind, BookDatabase, RepoError};
use bookshelf::config::{
    DEFAULT_PUBSUB_TOPIC, DatabaseBackend, DatastoreSettings, GAE_INSTANCE_VAR, GcpSettings,
    LogFormat, LoggingSettings, MongoSettings, MySqlSettings, OAUTH2_CALLBACK_VAR, OAuthSettings,
    PubsubSettings, RuntimeEnv, SecretString, SessionSettings, Settings, StorageSettings,
};
use bookshelf::domain::books::Book;
use bookshelf::infra::bootstrap::AppContext;
use bookshelf::infra::db::{
    BackendFactory, CLOUD_SQL_SOCKET_DIR, MemoryBookDatabase, MySqlTarget, open_database,
};
use bookshelf::infra::error::InfraError;
use bookshelf::infra::pubsub::PubsubError;
use tracing::level_filters::LevelFilter;

fn settings(database: DatabaseBackend) -> Settings {
    Settings {
        logging: LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        },
        database,
        storage: None,
        oauth: None,
        session: SessionSettings {
            secret: SecretString::new("integration-secret"),
            cookie_name: "bookshelf-session".to_string(),
            max_age: None,
            secure: false,
        },
        pubsub: None,
        gcp: GcpSettings::default(),
    }
}

fn mysql_settings() -> MySqlSettings {
    MySqlSettings {
        username: "root".to_string(),
        password: SecretString::new(""),
        instance: "bookshelf:us-east4:library".to_string(),
        host: "db.internal".to_string(),
        port: 3307,
        database: "library".to_string(),
        max_connections: NonZeroU32::new(5).expect("non-zero"),
    }
}

/// Records which constructor was invoked and hands back in-memory storage tagged with that kind.
#[derive(Default)]
struct RecordingFactory {
    calls: Mutex<Vec<String>>,
}

impl RecordingFactory {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

struct TaggedDatabase {
    inner: MemoryBookDatabase,
    kind: BackendKind,
}

#[async_trait]
impl BookDatabase for TaggedDatabase {
    async fn list_books(&self) -> Result<Vec<Book>, RepoError> {
        self.inner.list_books().await
    }

    async fn list_books_created_by(
        &self,
        user_id: &str,
    ) -> Result<Vec<Book>, RepoError> {
        self.inner.list_books_created_by(user_id).await
    }

    async fn get_book(&self, id: i64) -> Result<Book, RepoError> {
        self.inner.get_book(id).await
    }

    async fn add_book(&self, book: &Book) -> Result<i64, RepoError> {
        self.inner.add_book(book).await
    }

    async fn update_book(&self, book: &Book) -> Result<(), RepoError> {
        self.inner.update_book(book).await
    }

    async fn delete_book(&self, id: i64) -> Result<(), RepoError> {
        self.inner.delete_book(id).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    fn backend(&self) -> BackendKind {
        self.kind
    }
}

fn tagged(kind: BackendKind) -> Arc<dyn BookDatabase> {
    Arc::new(TaggedDatabase {
        inner: MemoryBookDatabase::new(),
        kind,
    })
}

#[async_trait]
impl BackendFactory for RecordingFactory {
    async fn memory(&self) -> Result<Arc<dyn BookDatabase>, InfraError> {
        self.record("memory".to_string());
        Ok(tagged(BackendKind::Memory))
    }

    async fn mysql(
        &self,
        _settings: &MySqlSettings,
        target: MySqlTarget,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        self.record(format!("mysql {target:?}"));
        Ok(tagged(BackendKind::MySql))
    }

    async fn mongo(&self, settings: &MongoSettings) -> Result<Arc<dyn BookDatabase>, InfraError> {
        self.record(format!("mongo {}", settings.address));
        Ok(tagged(BackendKind::Mongo))
    }

    async fn datastore(
        &self,
        settings: &DatastoreSettings,
        credentials: Option<&Path>,
        emulator_host: Option<&str>,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        self.record(format!(
            "datastore {} {:?} {:?}",
            settings.project_id, credentials, emulator_host
        ));
        Ok(tagged(BackendKind::Datastore))
    }
}

/// Every network-backed constructor fails.
struct UnreachableFactory;

#[async_trait]
impl BackendFactory for UnreachableFactory {
    async fn memory(&self) -> Result<Arc<dyn BookDatabase>, InfraError> {
        Ok(tagged(BackendKind::Memory))
    }

    async fn mysql(
        &self,
        _settings: &MySqlSettings,
        _target: MySqlTarget,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        Err(InfraError::database("connection refused"))
    }

    async fn mongo(&self, _settings: &MongoSettings) -> Result<Arc<dyn BookDatabase>, InfraError> {
        Err(InfraError::database("connection refused"))
    }

    async fn datastore(
        &self,
        _settings: &DatastoreSettings,
        _credentials: Option<&Path>,
        _emulator_host: Option<&str>,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        Err(InfraError::database("connection refused"))
    }
}

#[tokio::test]
async fn memory_bootstrap_builds_required_handles() {
    let context = AppContext::bootstrap(settings(DatabaseBackend::Memory), &RuntimeEnv::default())
        .await
        .expect("bootstrap");

    assert_eq!(context.db.backend(), BackendKind::Memory);
    assert!(context.storage.is_none());
    assert!(context.oauth.is_none());
    assert!(context.pubsub.is_none());
    assert_eq!(context.sessions.cookie_name(), "bookshelf-session");

    let id = context
        .db
        .add_book(&Book {
            title: "Dune".to_string(),
            ..Default::default()
        })
        .await
        .expect("add book");
    assert_eq!(context.db.get_book(id).await.expect("get").title, "Dune");

    context.shutdown().await;
}

#[tokio::test]
async fn pubsub_with_memory_database_yields_no_client() {
    let mut settings = settings(DatabaseBackend::Memory);
    settings.pubsub = Some(PubsubSettings {
        project_id: "bookshelf-project".to_string(),
        topic: DEFAULT_PUBSUB_TOPIC.to_string(),
    });
    // A credentials path that does not exist would fail any real client construction.
    settings.gcp.credentials_file = Some("/nonexistent/service-account.json".into());

    let context = AppContext::bootstrap(settings, &RuntimeEnv::default())
        .await
        .expect("bootstrap continues without pubsub");

    assert!(context.pubsub.is_none());
    assert_eq!(context.db.backend(), BackendKind::Memory);
}

#[tokio::test]
async fn oauth_redirect_follows_runtime_callback() {
    let mut settings = settings(DatabaseBackend::Memory);
    settings.oauth = Some(OAuthSettings {
        client_id: "client".to_string(),
        client_secret: SecretString::new("secret"),
        redirect_url: Some("http://configured.example.com/oauth2callback".to_string()),
    });
    let env = RuntimeEnv::from_vars([(
        OAUTH2_CALLBACK_VAR,
        "https://bookshelf.example.com/oauth2callback",
    )]);

    let context = AppContext::bootstrap(settings, &env)
        .await
        .expect("bootstrap");
    let oauth = context.oauth.expect("oauth configured");
    assert_eq!(
        oauth.redirect_url().as_str(),
        "https://bookshelf.example.com/oauth2callback"
    );
}

#[tokio::test]
async fn only_the_selected_backend_is_constructed() {
    let env = RuntimeEnv::default();
    let gcp = GcpSettings::default();

    let cases = [
        (DatabaseBackend::Memory, "memory"),
        (DatabaseBackend::MySql(mysql_settings()), "mysql"),
        (
            DatabaseBackend::Mongo(MongoSettings {
                address: "mongo.internal:27017".to_string(),
                credential: None,
                database: "bookshelf".to_string(),
            }),
            "mongo mongo.internal:27017",
        ),
        (
            DatabaseBackend::Datastore(DatastoreSettings {
                project_id: "bookshelf-project".to_string(),
            }),
            "datastore bookshelf-project",
        ),
    ];

    for (backend, expected_prefix) in cases {
        let factory = RecordingFactory::default();
        let db = open_database(&backend, &env, &gcp, &factory)
            .await
            .expect("open database");

        let calls = factory.calls();
        assert_eq!(calls.len(), 1, "exactly one constructor for {expected_prefix}");
        assert!(
            calls[0].starts_with(expected_prefix),
            "unexpected call {:?}",
            calls[0]
        );
        assert_eq!(db.backend(), backend.kind());
    }
}

#[tokio::test]
async fn mysql_target_depends_on_app_engine_instance() {
    let gcp = GcpSettings::default();
    let backend = DatabaseBackend::MySql(mysql_settings());

    let local = RecordingFactory::default();
    open_database(&backend, &RuntimeEnv::default(), &gcp, &local)
        .await
        .expect("local");
    assert_eq!(
        local.calls(),
        vec![format!(
            "mysql {:?}",
            MySqlTarget::Tcp {
                host: "db.internal".to_string(),
                port: 3307,
            }
        )]
    );

    let production = RecordingFactory::default();
    let env = RuntimeEnv::from_vars([(GAE_INSTANCE_VAR, "aef-default-20240101t000000-abcd")]);
    open_database(&backend, &env, &gcp, &production)
        .await
        .expect("production");
    assert_eq!(
        production.calls(),
        vec![format!(
            "mysql {:?}",
            MySqlTarget::UnixSocket(
                Path::new(CLOUD_SQL_SOCKET_DIR).join("bookshelf:us-east4:library")
            )
        )]
    );
}

#[tokio::test]
async fn database_errors_are_fatal() {
    let err = AppContext::bootstrap_with(
        settings(DatabaseBackend::MySql(mysql_settings())),
        &RuntimeEnv::default(),
        &UnreachableFactory,
    )
    .await
    .expect_err("database failure aborts startup");

    assert!(matches!(err, InfraError::Database { .. }));
}

#[tokio::test]
async fn storage_credential_errors_are_fatal() {
    let mut settings = settings(DatabaseBackend::MySql(mysql_settings()));
    settings.storage = Some(StorageSettings {
        bucket: "bookshelf-covers".to_string(),
    });
    settings.gcp.credentials_file = Some("/nonexistent/key.json".into());

    let factory = RecordingFactory::default();
    let err = AppContext::bootstrap_with(settings, &RuntimeEnv::default(), &factory)
        .await
        .expect_err("storage failure aborts startup");

    assert!(matches!(err, InfraError::Credentials { .. }));
    assert!(err.to_string().contains("/nonexistent/key.json"));
    assert_eq!(factory.calls().len(), 1);
}

#[tokio::test]
async fn pubsub_client_errors_are_fatal_for_shared_databases() {
    let mut settings = settings(DatabaseBackend::MySql(mysql_settings()));
    settings.pubsub = Some(PubsubSettings {
        project_id: "bookshelf-project".to_string(),
        topic: DEFAULT_PUBSUB_TOPIC.to_string(),
    });
    settings.gcp.credentials_file = Some("/nonexistent/key.json".into());

    let err = AppContext::bootstrap_with(
        settings,
        &RuntimeEnv::default(),
        &RecordingFactory::default(),
    )
    .await
    .expect_err("pubsub failure aborts startup");

    assert!(matches!(err, InfraError::Pubsub(PubsubError::Client(_))));
}

#[tokio::test]
async fn context_exposes_session_key_for_extractors() {
    let context = AppContext::bootstrap_with(
        settings(DatabaseBackend::Memory),
        &RuntimeEnv::default(),
        &RecordingFactory::default(),
    )
    .await
    .expect("bootstrap");

    let key = Key::from_ref(&context);
    assert_eq!(key.master(), context.sessions.key().master());
}
