//! Cloud Storage bucket handle used for book cover images.

use std::{fmt, path::Path};

use bytes::Bytes;
use google_cloud_storage::{
    client::{Client, ClientConfig, google_cloud_auth::credentials::CredentialsFile},
    http::objects::{
        delete::DeleteObjectRequest,
        upload::{Media, UploadObjectRequest, UploadType},
    },
};
use tracing::debug;
use uuid::Uuid;

use super::error::InfraError;

pub const PUBLIC_URL_BASE: &str = "https://storage.googleapis.com";
const FALLBACK_STEM: &str = "upload";

/// A storage client bound to one bucket.
#[derive(Clone)]
pub struct StorageBucket {
    client: Client,
    name: String,
}

impl fmt::Debug for StorageBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBucket")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An object written by [`StorageBucket::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub url: String,
}

impl StorageBucket {
    /// Build a client for `bucket`. Without a credentials file, application-default credentials are used.
    pub async fn open(bucket: &str, credentials: Option<&Path>) -> Result<Self, InfraError> {
        let config = match credentials {
            Some(path) => {
                let file = CredentialsFile::new_from_file(path.display().to_string())
                    .await
                    .map_err(|err| {
                        InfraError::credentials(format!("{}: {err}", path.display()))
                    })?;
                ClientConfig::default().with_credentials(file).await
            }
            None => ClientConfig::default().with_auth().await,
        }
        .map_err(|err| InfraError::storage(format!("failed to create storage client: {err}")))?;

        Ok(Self {
            client: Client::new(config),
            name: bucket.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        data: impl Into<Bytes>,
    ) -> Result<StoredObject, InfraError> {
        let name = object_name(filename);
        let mut media = Media::new(name.clone());
        media.content_type = content_type.to_string().into();

        let request = UploadObjectRequest {
            bucket: self.name.clone(),
            ..Default::default()
        };
        let data: Bytes = data.into();
        self.client
            .upload_object(&request, data, &UploadType::Simple(media))
            .await
            .map_err(|err| InfraError::storage(format!("upload of `{name}` failed: {err}")))?;

        debug!(bucket = %self.name, object = %name, "uploaded object");
        Ok(StoredObject {
            url: public_url(&self.name, &name),
            name,
        })
    }

    pub async fn delete(&self, object: &str) -> Result<(), InfraError> {
        let request = DeleteObjectRequest {
            bucket: self.name.clone(),
            object: object.to_string(),
            ..Default::default()
        };
        self.client
            .delete_object(&request)
            .await
            .map_err(|err| InfraError::storage(format!("delete of `{object}` failed: {err}")))
    }
}

/// `<uuid>-<slugged stem>[.<ext>]`, unique per call.
pub fn object_name(filename: &str) -> String {
    format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename))
}

fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let mut stem = slug::slugify(stem);
    if stem.is_empty() {
        stem = FALLBACK_STEM.to_string();
    }

    match extension
        .map(|ext| {
            ext.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|ext| !ext.is_empty())
    {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

pub fn public_url(bucket: &str, object: &str) -> String {
    format!("{PUBLIC_URL_BASE}/{bucket}/{object}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_is_prefixed_with_uuid() {
        let name = object_name("My Cover.JPG");
        let (prefix, rest) = name.split_at(36);
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(rest, "-my-cover.jpg");
    }

    #[test]
    fn object_names_are_unique() {
        assert_ne!(object_name("a.png"), object_name("a.png"));
    }

    #[test]
    fn sanitize_strips_directories_and_symbols() {
        assert_eq!(sanitize_filename("../../etc/pass wd"), "pass-wd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\Dune (1965).png"), "dune-1965.png");
    }

    #[test]
    fn sanitize_falls_back_for_empty_stems() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("???.gif"), "upload.gif");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn public_url_format() {
        assert_eq!(
            public_url("bookshelf-bucket", "abc-dune.png"),
            "https://storage.googleapis.com/bookshelf-bucket/abc-dune.png"
        );
    }
}
