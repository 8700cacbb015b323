//! Bookshelf startup wiring: configuration, backends and the shared handle set.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
