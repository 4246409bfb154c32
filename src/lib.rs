#![deny(missing_docs)]

//! Core library for the MedKeep document processing and retrieval service.

/// HTTP routing and management handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Extraction job state machine.
pub mod extraction;
/// Reindex and vector-consistency management.
pub mod indexing;
/// Bounded background job runtime.
pub mod jobs;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Row types and status enums shared across the pipeline.
pub mod models;
/// Text chunking utilities.
pub mod processing;
/// Text recognition provider strategy.
pub mod recognition;
/// Application service wiring the pipeline behind the management surface.
pub mod service;
/// PostgreSQL persistence: repositories and the patient vector store.
pub mod store;
