//! Infrastructure adapters and runtime bootstrap.

pub mod bootstrap;
pub mod db;
pub mod error;
pub mod gcp;
pub mod oauth;
pub mod pubsub;
pub mod session;
pub mod storage;
pub mod telemetry;
