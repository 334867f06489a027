//! # taskrelay
//!
//! Distributed task pipeline: a Postgres task store with an audited status
//! history, priority dispatch over pgmq, a Redis execution lock, pluggable
//! executors run under a retry policy, and a recovery sweep for stuck tasks.
//!
//! Every collaborator is a trait with a production and an in-memory
//! implementation, and OpenTelemetry observability throughout.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lock;
pub mod model;
pub mod payload;
pub mod queue;
pub mod retry;
pub mod store;
pub mod telemetry;
