//! Book storage backends and the selector that opens exactly one of them.

mod datastore;
mod memory;
mod mongo;
mod mysql;

pub use datastore::{DatastoreBookDatabase, DatastoreEndpoint};
pub use memory::MemoryBookDatabase;
pub use mongo::MongoBookDatabase;
pub use mysql::{CLOUD_SQL_SOCKET_DIR, MySqlBookDatabase, MySqlTarget, map_sqlx_error};

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::application::repos::BookDatabase;
use crate::config::{
    DatabaseBackend, DatastoreSettings, GcpSettings, MongoSettings, MySqlSettings, RuntimeEnv,
};
use crate::infra::error::InfraError;
use crate::infra::gcp::{AccessTokens, DATASTORE_SCOPE};

/// Constructs one kind of backend. [`open_database`] calls exactly one method per startup.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn memory(&self) -> Result<Arc<dyn BookDatabase>, InfraError>;

    async fn mysql(
        &self,
        settings: &MySqlSettings,
        target: MySqlTarget,
    ) -> Result<Arc<dyn BookDatabase>, InfraError>;

    async fn mongo(&self, settings: &MongoSettings) -> Result<Arc<dyn BookDatabase>, InfraError>;

    async fn datastore(
        &self,
        settings: &DatastoreSettings,
        credentials: Option<&Path>,
        emulator_host: Option<&str>,
    ) -> Result<Arc<dyn BookDatabase>, InfraError>;
}

/// Factory that connects to the real services.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudBackends;

#[async_trait]
impl BackendFactory for CloudBackends {
    async fn memory(&self) -> Result<Arc<dyn BookDatabase>, InfraError> {
        Ok(Arc::new(MemoryBookDatabase::new()))
    }

    async fn mysql(
        &self,
        settings: &MySqlSettings,
        target: MySqlTarget,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        let db = MySqlBookDatabase::connect(settings, &target)
            .await
            .map_err(|err| InfraError::database(format!("mysql ({target:?}): {err}")))?;
        Ok(Arc::new(db))
    }

    async fn mongo(&self, settings: &MongoSettings) -> Result<Arc<dyn BookDatabase>, InfraError> {
        let db = MongoBookDatabase::connect(settings)
            .await
            .map_err(|err| InfraError::database(format!("mongo ({}): {err}", settings.address)))?;
        Ok(Arc::new(db))
    }

    async fn datastore(
        &self,
        settings: &DatastoreSettings,
        credentials: Option<&Path>,
        emulator_host: Option<&str>,
    ) -> Result<Arc<dyn BookDatabase>, InfraError> {
        let http = reqwest::Client::new();
        let db = match emulator_host {
            Some(host) => DatastoreBookDatabase::new(
                http,
                DatastoreEndpoint::emulator(host),
                &settings.project_id,
                None,
            ),
            None => {
                let tokens = AccessTokens::open(&[DATASTORE_SCOPE], credentials).await?;
                DatastoreBookDatabase::new(
                    http,
                    DatastoreEndpoint::production(),
                    &settings.project_id,
                    Some(tokens),
                )
            }
        };
        Ok(Arc::new(db))
    }
}

/// Open the configured backend. Only the selected arm of the factory is invoked.
pub async fn open_database(
    backend: &DatabaseBackend,
    env: &RuntimeEnv,
    gcp: &GcpSettings,
    factory: &dyn BackendFactory,
) -> Result<Arc<dyn BookDatabase>, InfraError> {
    let db = match backend {
        DatabaseBackend::Memory => factory.memory().await?,
        DatabaseBackend::MySql(settings) => {
            let target = MySqlTarget::resolve(settings, env.is_production());
            info!(
                target: "bookshelf::startup",
                production = env.is_production(),
                ?target,
                "connecting to mysql"
            );
            factory.mysql(settings, target).await?
        }
        DatabaseBackend::Mongo(settings) => factory.mongo(settings).await?,
        DatabaseBackend::Datastore(settings) => {
            factory
                .datastore(
                    settings,
                    gcp.credentials_file.as_deref(),
                    env.datastore_emulator_host(),
                )
                .await?
        }
    };

    if db.backend() != backend.kind() {
        return Err(InfraError::configuration(format!(
            "factory returned a {} handle for the {} backend",
            db.backend(),
            backend.kind()
        )));
    }

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::BackendKind;
    use crate::config::DATASTORE_EMULATOR_HOST_VAR;

    fn datastore() -> DatabaseBackend {
        DatabaseBackend::Datastore(DatastoreSettings {
            project_id: "bookshelf-project".to_string(),
        })
    }

    #[tokio::test]
    async fn datastore_emulator_needs_no_credentials() {
        let env = RuntimeEnv::from_vars([(DATASTORE_EMULATOR_HOST_VAR, "localhost:8081")]);
        let db = open_database(&datastore(), &env, &GcpSettings::default(), &CloudBackends)
            .await
            .expect("emulator backend");
        assert_eq!(db.backend(), BackendKind::Datastore);
    }

    #[tokio::test]
    async fn datastore_key_file_errors_are_credentials_errors() {
        let gcp = GcpSettings {
            credentials_file: Some("/nonexistent/key.json".into()),
        };
        let err = open_database(&datastore(), &RuntimeEnv::default(), &gcp, &CloudBackends)
            .await
            .err()
            .expect("missing key file");
        assert!(matches!(err, InfraError::Credentials { .. }));
    }
}
