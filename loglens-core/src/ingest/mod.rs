//! Ingestion layer for access logs
//!
//! Turns a raw byte stream into parsed entries, aggregates and a content digest.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    ┌────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ byte stream │ ─► │ line::parse│ ─► │ timestamp::  │ ─► │  Aggregator  │
//! │  (BufRead)  │    │            │    │  normalize   │    │              │
//! └─────────────┘    └────────────┘    └──────────────┘    └──────┬───────┘
//!                                                                 │
//!                                         batches ◄───────────────┤
//!                                      (BatchSink)                ▼
//!                                                              Summary
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use loglens_core::ingest::Aggregator;
//! use loglens_core::types::LogEntry;
//!
//! let input = "127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET / HTTP/1.0\" 200 5 \"-\" \"-\"\n";
//! let mut events = Vec::new();
//! let mut sink = |batch: &[LogEntry]| -> loglens_core::Result<()> {
//!     events.extend_from_slice(batch);
//!     Ok(())
//! };
//! let summary = Aggregator::default().run("subject", input.as_bytes(), &mut sink).unwrap();
//! assert_eq!(summary.total_lines, 1);
//! assert_eq!(events.len(), 1);
//! ```

mod aggregator;
pub mod line;
pub mod timestamp;

pub use aggregator::{parse_entry, Aggregator, BatchSink, DEFAULT_BATCH_SIZE, TOP_N};
pub use line::RawFields;
