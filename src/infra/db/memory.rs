//! Process-local book storage for tests and single-process development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::repos::{BackendKind, BookDatabase, RepoError};
use crate::domain::books::{Book, BookId};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: BookId,
    books: BTreeMap<BookId, Book>,
}

/// Book storage held entirely in this process. Other processes never observe its writes.
#[derive(Debug, Default)]
pub struct MemoryBookDatabase {
    state: RwLock<MemoryState>,
}

impl MemoryBookDatabase {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_id: 1,
                books: BTreeMap::new(),
            }),
        }
    }
}

fn sorted_by_title(mut books: Vec<Book>) -> Vec<Book> {
    books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
    books
}

#[async_trait]
impl BookDatabase for MemoryBookDatabase {
    async fn list_books(&self) -> Result<Vec<Book>, RepoError> {
        let state = self.state.read().await;
        Ok(sorted_by_title(state.books.values().cloned().collect()))
    }

    async fn list_books_created_by(&self, user_id: &str) -> Result<Vec<Book>, RepoError> {
        let state = self.state.read().await;
        Ok(sorted_by_title(
            state
                .books
                .values()
                .filter(|book| book.created_by_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_book(&self, id: BookId) -> Result<Book, RepoError> {
        let state = self.state.read().await;
        state
            .books
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found(id))
    }

    async fn add_book(&self, book: &Book) -> Result<BookId, RepoError> {
        book.validate()?;

        let mut state = self.state.write().await;
        // `Default` leaves the counter at zero; ids start at one either way.
        let id = state.next_id.max(1);
        state.next_id = id
            .checked_add(1)
            .ok_or_else(|| RepoError::from_persistence("book id space exhausted"))?;

        let mut stored = book.clone();
        stored.id = id;
        state.books.insert(id, stored);
        Ok(id)
    }

    async fn update_book(&self, book: &Book) -> Result<(), RepoError> {
        book.validate()?;
        if book.id == 0 {
            return Err(RepoError::InvalidInput {
                message: "book with unassigned id passed to update".to_string(),
            });
        }

        let mut state = self.state.write().await;
        let slot = state
            .books
            .get_mut(&book.id)
            .ok_or_else(|| RepoError::not_found(book.id))?;
        *slot = book.clone();
        Ok(())
    }

    async fn delete_book(&self, id: BookId) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        state
            .books
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found(id))
    }

    async fn close(&self) {
        self.state.write().await.books.clear();
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, owner: &str) -> Book {
        Book {
            title: title.to_string(),
            author: "Anon".to_string(),
            created_by_id: owner.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assigns_sequential_ids_and_lists_by_title() {
        let db = MemoryBookDatabase::new();
        let first = db.add_book(&book("Zen", "u1")).await.expect("add");
        let second = db.add_book(&book("Art", "u2")).await.expect("add");
        assert_eq!((first, second), (1, 2));

        let titles: Vec<_> = db
            .list_books()
            .await
            .expect("list")
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["Art", "Zen"]);
    }

    #[tokio::test]
    async fn default_instance_starts_at_one() {
        let db = MemoryBookDatabase::default();
        assert_eq!(db.add_book(&book("Dune", "u1")).await.expect("add"), 1);
    }

    #[tokio::test]
    async fn filters_by_creator() {
        let db = MemoryBookDatabase::new();
        db.add_book(&book("A", "u1")).await.expect("add");
        db.add_book(&book("B", "u2")).await.expect("add");
        db.add_book(&book("C", "u1")).await.expect("add");

        let mine = db.list_books_created_by("u1").await.expect("list");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|b| b.created_by_id == "u1"));
    }

    #[tokio::test]
    async fn update_and_delete_require_existing_book() {
        let db = MemoryBookDatabase::new();
        let id = db.add_book(&book("Dune", "u1")).await.expect("add");

        let mut updated = db.get_book(id).await.expect("get");
        updated.author = "Frank Herbert".to_string();
        db.update_book(&updated).await.expect("update");
        assert_eq!(db.get_book(id).await.expect("get").author, "Frank Herbert");

        let mut missing = updated.clone();
        missing.id = 99;
        assert!(matches!(
            db.update_book(&missing).await,
            Err(RepoError::NotFound { id: 99 })
        ));

        db.delete_book(id).await.expect("delete");
        assert!(matches!(
            db.delete_book(id).await,
            Err(RepoError::NotFound { .. })
        ));
        assert!(matches!(
            db.get_book(id).await,
            Err(RepoError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_untitled_books() {
        let db = MemoryBookDatabase::new();
        let err = db.add_book(&book("", "u1")).await.expect_err("invalid");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
        assert_eq!(db.backend(), BackendKind::Memory);
    }
}
