//! MongoDB book storage.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection,
    bson::{Document, doc},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, Credential},
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::application::repos::{BackendKind, BookDatabase, RepoError};
use crate::config::MongoSettings;
use crate::domain::books::{Book, BookId};

const COLLECTION: &str = "books";
const DUPLICATE_KEY: i32 = 11000;
const INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BookDocument {
    #[serde(rename = "_id")]
    id: BookId,
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    published_date: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    created_by: String,
    #[serde(default)]
    created_by_id: String,
}

impl BookDocument {
    fn from_book(book: &Book, id: BookId) -> Self {
        Self {
            id,
            title: book.title.clone(),
            author: book.author.clone(),
            published_date: book.published_date.clone(),
            image_url: book.image_url.clone(),
            description: book.description.clone(),
            created_by: book.created_by.clone(),
            created_by_id: book.created_by_id.clone(),
        }
    }
}

impl From<BookDocument> for Book {
    fn from(document: BookDocument) -> Self {
        Self {
            id: document.id,
            title: document.title,
            author: document.author,
            published_date: document.published_date,
            image_url: document.image_url,
            description: document.description,
            created_by: document.created_by,
            created_by_id: document.created_by_id,
        }
    }
}

/// `mongodb://` URI for the configured address. Credentials are attached separately.
pub fn connection_uri(settings: &MongoSettings) -> String {
    if settings.address.starts_with("mongodb://") || settings.address.starts_with("mongodb+srv://")
    {
        settings.address.clone()
    } else {
        format!("mongodb://{}", settings.address)
    }
}

#[derive(Debug, Clone)]
pub struct MongoBookDatabase {
    client: Client,
    books: Collection<BookDocument>,
}

impl MongoBookDatabase {
    /// Connect and ping the server so an unreachable deployment fails at startup.
    pub async fn connect(settings: &MongoSettings) -> Result<Self, mongodb::error::Error> {
        let mut options = ClientOptions::parse(connection_uri(settings)).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        if let Some(credential) = settings.credential.as_ref() {
            let mut auth = Credential::default();
            auth.username = Some(credential.username.clone());
            auth.password = Some(credential.password.expose().to_string());
            options.credential = Some(auth);
        }

        let client = Client::with_options(options)?;
        let database = client.database(&settings.database);
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(Self {
            books: database.collection(COLLECTION),
            client,
        })
    }

    async fn find_sorted(&self, filter: Document) -> Result<Vec<Book>, RepoError> {
        let cursor = self
            .books
            .find(filter)
            .sort(doc! { "title": 1, "_id": 1 })
            .await
            .map_err(RepoError::from_persistence)?;
        let documents: Vec<BookDocument> = cursor
            .try_collect()
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(documents.into_iter().map(Book::from).collect())
    }
}

fn random_id() -> BookId {
    rand::thread_rng().gen_range(1..=BookId::MAX)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl BookDatabase for MongoBookDatabase {
    async fn list_books(&self) -> Result<Vec<Book>, RepoError> {
        self.find_sorted(doc! {}).await
    }

    async fn list_books_created_by(&self, user_id: &str) -> Result<Vec<Book>, RepoError> {
        self.find_sorted(doc! { "created_by_id": user_id }).await
    }

    async fn get_book(&self, id: BookId) -> Result<Book, RepoError> {
        self.books
            .find_one(doc! { "_id": id })
            .await
            .map_err(RepoError::from_persistence)?
            .map(Book::from)
            .ok_or_else(|| RepoError::not_found(id))
    }

    async fn add_book(&self, book: &Book) -> Result<BookId, RepoError> {
        book.validate()?;

        for _ in 0..INSERT_ATTEMPTS {
            let id = random_id();
            match self.books.insert_one(BookDocument::from_book(book, id)).await {
                Ok(_) => return Ok(id),
                Err(err) if is_duplicate_key(&err) => continue,
                Err(err) => return Err(RepoError::from_persistence(err)),
            }
        }

        Err(RepoError::from_persistence(
            "could not allocate a unique book id",
        ))
    }

    async fn update_book(&self, book: &Book) -> Result<(), RepoError> {
        book.validate()?;

        let result = self
            .books
            .replace_one(doc! { "_id": book.id }, BookDocument::from_book(book, book.id))
            .await
            .map_err(RepoError::from_persistence)?;

        if result.matched_count == 0 {
            return Err(RepoError::not_found(book.id));
        }
        Ok(())
    }

    async fn delete_book(&self, id: BookId) -> Result<(), RepoError> {
        let result = self
            .books
            .delete_one(doc! { "_id": id })
            .await
            .map_err(RepoError::from_persistence)?;

        if result.deleted_count == 0 {
            return Err(RepoError::not_found(id));
        }
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Mongo
    }
}
