//! Book records persisted by every storage backend.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Identifier assigned by the backend on insert. Zero means "not yet stored".
pub type BookId = i64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub published_date: String,
    pub image_url: String,
    pub description: String,
    pub created_by: String,
    pub created_by_id: String,
}

impl Book {
    /// Fields a backend must reject before persisting the record.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("book title must not be empty"));
        }
        if self.id < 0 {
            return Err(DomainError::validation("book id must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_title_is_rejected() {
        let book = Book {
            title: "   ".to_string(),
            ..Default::default()
        };
        assert!(book.validate().is_err());
    }

    #[test]
    fn titled_book_is_valid() {
        let book = Book {
            title: "Dune".to_string(),
            created_by: "Ada".to_string(),
            ..Default::default()
        };
        assert!(book.validate().is_ok());
    }
}
