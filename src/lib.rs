#![deny(missing_docs)]

//! Core library for the docsum document enrichment pipeline.

/// Environment-driven configuration management.
pub mod config;
/// Primary, secondary, and email text extraction.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Run metrics helpers.
pub mod metrics;
/// Reconciliation engine and document processing stages.
pub mod processing;
/// Backoff wrapper for external service calls.
pub mod retry;
/// Record persistence.
pub mod store;
/// Abstractive summarization clients.
pub mod summarization;
