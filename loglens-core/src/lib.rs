//! # loglens-core
//!
//! Core library for loglens - an access log ingestion and analysis pipeline.
//!
//! This library provides:
//! - A streaming parser and aggregator for combined-format access logs
//! - Durable, time-ordered event storage with paginated queries
//! - An analysis job lifecycle driven by an at-least-once work queue
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! An upload is stored as a blob and registered as a [`LogRecord`]. A queued
//! [`Job`] is picked up by the [`Worker`], which streams the blob through the
//! [`Aggregator`]. Parsed events flow in batches into the event store while the
//! aggregator builds a [`Summary`]; the job completes once the summary is written.
//!
//! ## Example
//!
//! ```rust,no_run
//! use loglens_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use blob::{BlobStore, LocalBlobStore};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use events::{EventStore, QueryEngine};
pub use ingest::Aggregator;
pub use jobs::JobCoordinator;
pub use queue::{SqliteWorkQueue, WorkQueue};
pub use runner::Analyzer;
pub use service::LogService;
pub use types::*;
pub use worker::{Outcome, Worker};

// Public modules
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod runner;
pub mod service;
pub mod types;
pub mod worker;
