//! Access tokens for Google REST APIs the client libraries do not cover.

use std::{path::Path, sync::Arc};

use google_cloud_storage::client::google_cloud_auth::{
    credentials::CredentialsFile, project::Config, token::DefaultTokenSourceProvider,
};
use google_cloud_token::{TokenSource, TokenSourceProvider};

use super::error::InfraError;

pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Cached bearer tokens from a service-account key file or application-default credentials.
#[derive(Debug, Clone)]
pub struct AccessTokens {
    source: Arc<dyn TokenSource>,
}

impl AccessTokens {
    /// With `credentials` unset the lookup follows `GOOGLE_APPLICATION_CREDENTIALS`, then the
    /// metadata server.
    pub async fn open(scopes: &[&str], credentials: Option<&Path>) -> Result<Self, InfraError> {
        let config = Config::default().with_scopes(scopes);
        let provider = match credentials {
            Some(path) => {
                let file = CredentialsFile::new_from_file(path.display().to_string())
                    .await
                    .map_err(|err| {
                        InfraError::credentials(format!("{}: {err}", path.display()))
                    })?;
                DefaultTokenSourceProvider::new_with_credentials(config, Box::new(file)).await
            }
            None => DefaultTokenSourceProvider::new(config).await,
        }
        .map_err(|err| InfraError::credentials(format!("failed to create token source: {err}")))?;

        Ok(Self {
            source: provider.token_source(),
        })
    }

    /// `Authorization` header value (`Bearer <token>`), refreshed when expired.
    pub async fn authorization(&self) -> Result<String, InfraError> {
        self.source
            .token()
            .await
            .map_err(|err| InfraError::credentials(format!("failed to fetch access token: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn missing_key_file_is_a_credentials_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = AccessTokens::open(&[DATASTORE_SCOPE], Some(&dir.path().join("absent.json")))
            .await
            .expect_err("no file");

        assert!(matches!(err, InfraError::Credentials { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[tokio::test]
    async fn malformed_key_file_is_a_credentials_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"not json").expect("write key");

        let err = AccessTokens::open(&[DATASTORE_SCOPE], Some(file.path()))
            .await
            .expect_err("malformed key");
        assert!(matches!(err, InfraError::Credentials { .. }));
    }
}
