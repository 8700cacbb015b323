//! Repository traits describing persistence adapters.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::books::{Book, BookId};
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("book {id} not found")]
    NotFound { id: BookId },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn not_found(id: BookId) -> Self {
        Self::NotFound { id }
    }
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        Self::InvalidInput {
            message: err.to_string(),
        }
    }
}

/// Which concrete backend sits behind a [`BookDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    MySql,
    Mongo,
    Datastore,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::MySql => "mysql",
            BackendKind::Mongo => "mongo",
            BackendKind::Datastore => "datastore",
        }
    }

    /// Whether state written by one process is visible to another process.
    pub fn shares_state_across_processes(self) -> bool {
        !matches!(self, BackendKind::Memory)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set for persisting and retrieving books.
#[async_trait]
pub trait BookDatabase: Send + Sync {
    /// All books ordered by title.
    async fn list_books(&self) -> Result<Vec<Book>, RepoError>;

    /// Books created by the given user, ordered by title.
    async fn list_books_created_by(&self, user_id: &str) -> Result<Vec<Book>, RepoError>;

    async fn get_book(&self, id: BookId) -> Result<Book, RepoError>;

    /// Store a new book and return the identifier the backend assigned.
    async fn add_book(&self, book: &Book) -> Result<BookId, RepoError>;

    async fn update_book(&self, book: &Book) -> Result<(), RepoError>;

    async fn delete_book(&self, id: BookId) -> Result<(), RepoError>;

    /// Release pooled connections. Further calls after `close` are undefined.
    async fn close(&self);

    fn backend(&self) -> BackendKind;
}
