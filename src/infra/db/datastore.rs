//! Cloud Datastore book storage over the v1 REST API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::application::repos::{BackendKind, BookDatabase, RepoError};
use crate::domain::books::{Book, BookId};
use crate::infra::gcp::AccessTokens;

const KIND: &str = "Book";
const MORE_RESULTS_NOT_FINISHED: &str = "NOT_FINISHED";

const TITLE: &str = "Title";
const AUTHOR: &str = "Author";
const PUBLISHED_DATE: &str = "PublishedDate";
const IMAGE_URL: &str = "ImageURL";
const DESCRIPTION: &str = "Description";
const CREATED_BY: &str = "CreatedBy";
const CREATED_BY_ID: &str = "CreatedByID";

/// Base URL of the Datastore API, either Google's or a local emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreEndpoint {
    base_url: String,
}

impl DatastoreEndpoint {
    pub const PRODUCTION_URL: &'static str = "https://datastore.googleapis.com";

    pub fn production() -> Self {
        Self {
            base_url: Self::PRODUCTION_URL.to_string(),
        }
    }

    /// `host` is the `DATASTORE_EMULATOR_HOST` value, usually `localhost:8081`.
    pub fn emulator(host: &str) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Self { base_url }
    }

    pub fn method_url(&self, project_id: &str, method: &str) -> String {
        format!("{}/v1/projects/{project_id}:{method}", self.base_url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Key {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partition_id: Option<PartitionId>,
    path: Vec<PathElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionId {
    project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PathElement {
    kind: String,
    // int64 values travel as JSON strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    exclude_from_indexes: bool,
}

impl Value {
    fn string(value: &str) -> Self {
        Self {
            string_value: Some(value.to_string()),
            exclude_from_indexes: false,
        }
    }

    fn unindexed(value: &str) -> Self {
        Self {
            exclude_from_indexes: true,
            ..Self::string(value)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entity {
    key: Key,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

impl Entity {
    fn id(&self) -> Option<BookId> {
        self.key.path.last()?.id.as_deref()?.parse().ok()
    }

    fn text(&self, name: &str) -> String {
        self.properties
            .get(name)
            .and_then(|value| value.string_value.clone())
            .unwrap_or_default()
    }

    fn into_book(self) -> Result<Book, RepoError> {
        let id = self
            .id()
            .ok_or_else(|| RepoError::from_persistence("datastore entity without numeric id"))?;
        Ok(Book {
            id,
            title: self.text(TITLE),
            author: self.text(AUTHOR),
            published_date: self.text(PUBLISHED_DATE),
            image_url: self.text(IMAGE_URL),
            description: self.text(DESCRIPTION),
            created_by: self.text(CREATED_BY),
            created_by_id: self.text(CREATED_BY_ID),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    found: Vec<EntityResult>,
}

#[derive(Debug, Deserialize)]
struct EntityResult {
    entity: Entity,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    batch: QueryResultBatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultBatch {
    #[serde(default)]
    entity_results: Vec<EntityResult>,
    #[serde(default)]
    end_cursor: Option<String>,
    #[serde(default)]
    more_results: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    mutation_results: Vec<MutationResult>,
}

#[derive(Debug, Deserialize)]
struct MutationResult {
    #[serde(default)]
    key: Option<Key>,
}

enum CallError {
    Status(StatusCode, String),
    Repo(RepoError),
}

impl From<CallError> for RepoError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Status(status, body) => {
                RepoError::from_persistence(format!("datastore returned {status}: {body}"))
            }
            CallError::Repo(err) => err,
        }
    }
}

/// Books stored as `Book` entities with numeric ids allocated by Datastore.
#[derive(Debug, Clone)]
pub struct DatastoreBookDatabase {
    http: reqwest::Client,
    endpoint: DatastoreEndpoint,
    project_id: String,
    tokens: Option<AccessTokens>,
}

impl DatastoreBookDatabase {
    /// `tokens` is `None` against the emulator, which accepts unauthenticated calls.
    pub fn new(
        http: reqwest::Client,
        endpoint: DatastoreEndpoint,
        project_id: &str,
        tokens: Option<AccessTokens>,
    ) -> Self {
        Self {
            http,
            endpoint,
            project_id: project_id.to_string(),
            tokens,
        }
    }

    fn key(&self, id: Option<BookId>) -> Key {
        Key {
            partition_id: Some(PartitionId {
                project_id: self.project_id.clone(),
            }),
            path: vec![PathElement {
                kind: KIND.to_string(),
                id: id.map(|id| id.to_string()),
            }],
        }
    }

    fn entity(&self, book: &Book, id: Option<BookId>) -> Entity {
        let properties = BTreeMap::from([
            (TITLE.to_string(), Value::string(&book.title)),
            (AUTHOR.to_string(), Value::string(&book.author)),
            (PUBLISHED_DATE.to_string(), Value::string(&book.published_date)),
            (IMAGE_URL.to_string(), Value::unindexed(&book.image_url)),
            (DESCRIPTION.to_string(), Value::unindexed(&book.description)),
            (CREATED_BY.to_string(), Value::string(&book.created_by)),
            (CREATED_BY_ID.to_string(), Value::string(&book.created_by_id)),
        ]);
        Entity {
            key: self.key(id),
            properties,
        }
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, CallError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(self.endpoint.method_url(&self.project_id, method))
            .json(body);
        if let Some(tokens) = self.tokens.as_ref() {
            let authorization = tokens
                .authorization()
                .await
                .map_err(|err| CallError::Repo(RepoError::from_persistence(err)))?;
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|err| {
            CallError::Repo(if err.is_timeout() {
                RepoError::Timeout
            } else {
                RepoError::from_persistence(err)
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status(status, body));
        }

        response
            .json()
            .await
            .map_err(|err| CallError::Repo(RepoError::from_persistence(err)))
    }

    async fn run_query(&self, filter: Option<serde_json::Value>) -> Result<Vec<Book>, RepoError> {
        let mut books = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = json!({
                "kind": [{ "name": KIND }],
                "order": [{ "property": { "name": TITLE }, "direction": "ASCENDING" }],
            });
            if let Some(filter) = filter.as_ref() {
                query["filter"] = filter.clone();
            }
            if let Some(cursor) = cursor.as_ref() {
                query["startCursor"] = json!(cursor);
            }

            let response: RunQueryResponse = self
                .call("runQuery", &json!({ "query": query }))
                .await?;
            let batch = response.batch;
            for result in batch.entity_results {
                books.push(result.entity.into_book()?);
            }

            let finished = batch.more_results.as_deref() != Some(MORE_RESULTS_NOT_FINISHED);
            match batch.end_cursor {
                Some(next) if !finished => cursor = Some(next),
                _ => break,
            }
        }

        Ok(books)
    }

    async fn commit(&self, mutation: serde_json::Value) -> Result<CommitResponse, CallError> {
        self.call(
            "commit",
            &json!({ "mode": "NON_TRANSACTIONAL", "mutations": [mutation] }),
        )
        .await
    }
}

#[async_trait]
impl BookDatabase for DatastoreBookDatabase {
    async fn list_books(&self) -> Result<Vec<Book>, RepoError> {
        self.run_query(None).await
    }

    async fn list_books_created_by(&self, user_id: &str) -> Result<Vec<Book>, RepoError> {
        let filter = json!({
            "propertyFilter": {
                "property": { "name": CREATED_BY_ID },
                "op": "EQUAL",
                "value": { "stringValue": user_id },
            }
        });
        self.run_query(Some(filter)).await
    }

    async fn get_book(&self, id: BookId) -> Result<Book, RepoError> {
        let response: LookupResponse = self
            .call("lookup", &json!({ "keys": [self.key(Some(id))] }))
            .await?;

        response
            .found
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::not_found(id))?
            .entity
            .into_book()
    }

    async fn add_book(&self, book: &Book) -> Result<BookId, RepoError> {
        book.validate()?;

        let response = self
            .commit(json!({ "insert": self.entity(book, None) }))
            .await?;

        response
            .mutation_results
            .into_iter()
            .next()
            .and_then(|result| result.key)
            .and_then(|key| key.path.last()?.id.as_deref()?.parse().ok())
            .ok_or_else(|| RepoError::from_persistence("datastore did not return an allocated id"))
    }

    async fn update_book(&self, book: &Book) -> Result<(), RepoError> {
        book.validate()?;

        match self
            .commit(json!({ "update": self.entity(book, Some(book.id)) }))
            .await
        {
            Ok(_) => Ok(()),
            Err(CallError::Status(StatusCode::NOT_FOUND, _)) => Err(RepoError::not_found(book.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_book(&self, id: BookId) -> Result<(), RepoError> {
        // Datastore deletes are idempotent; look the entity up so missing ids are reported.
        self.get_book(id).await?;
        self.commit(json!({ "delete": self.key(Some(id)) }))
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn close(&self) {}

    fn backend(&self) -> BackendKind {
        BackendKind::Datastore
    }
}
