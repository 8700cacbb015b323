//! Application-facing contracts shared by handlers and workers.

pub mod error;
pub mod repos;
