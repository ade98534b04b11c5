#![deny(missing_docs)]

//! Core library for the Rusty Review streaming paper-review server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text inference client abstraction and adapters.
pub mod inference;
/// Structured logging and tracing setup.
pub mod logging;
/// Review metrics helpers.
pub mod metrics;
/// Related-record retrieval, fusion and re-ranking.
pub mod retrieval;
/// Review pipeline: stages, policy and orchestration.
pub mod review;
/// Record-search provider adapters.
pub mod search;
/// Server-sent event encoding of review output.
pub mod stream;
