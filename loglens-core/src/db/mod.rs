//! Database layer for loglens
//!
//! This module provides the durable store using SQLite with:
//! - Schema migrations
//! - Repository pattern for log records, jobs, summaries and events
//! - The backing tables of the local work queue

pub mod repo;
pub mod schema;

pub use repo::{Database, KeyRange, StorePage};
