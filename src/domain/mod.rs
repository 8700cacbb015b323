//! Domain entities for the bookshelf.

pub mod books;
pub mod error;
