//! Durable access events
//!
//! Events live in one partition per subject, sorted by a unique ordering key.
//! [`EventSink`] writes them during a run, [`QueryEngine`] reads them back a page
//! at a time, and [`purge_subject`] removes a whole partition.
//!
//! All three talk to storage through [`EventStore`], which mirrors the limits of
//! a key-value store: bounded batch writes and continuation-token reads.

mod query;
mod sink;

pub use crate::db::{KeyRange, StorePage};
pub use query::QueryEngine;
pub use sink::EventSink;

use crate::config::MAX_WRITE_CHUNK;
use crate::db::Database;
use crate::error::Result;
use crate::types::AccessEvent;
use chrono::{DateTime, Utc};

/// Storage operations needed for events.
pub trait EventStore: Send + Sync {
    /// Write at most [`MAX_WRITE_CHUNK`] events; existing keys are overwritten.
    fn put_events(&self, events: &[AccessEvent]) -> Result<()>;

    /// Delete at most [`MAX_WRITE_CHUNK`] events of one subject.
    fn delete_events(&self, subject_id: &str, keys: &[DateTime<Utc>]) -> Result<()>;

    /// Read one page of events in key order, resuming after `start_after`.
    fn query_events(
        &self,
        subject_id: &str,
        range: &KeyRange,
        start_after: Option<&str>,
        page_size: usize,
        descending: bool,
    ) -> Result<StorePage>;
}

impl EventStore for Database {
    fn put_events(&self, events: &[AccessEvent]) -> Result<()> {
        Database::put_events(self, events)
    }

    fn delete_events(&self, subject_id: &str, keys: &[DateTime<Utc>]) -> Result<()> {
        Database::delete_events(self, subject_id, keys)
    }

    fn query_events(
        &self,
        subject_id: &str,
        range: &KeyRange,
        start_after: Option<&str>,
        page_size: usize,
        descending: bool,
    ) -> Result<StorePage> {
        Database::query_events(self, subject_id, range, start_after, page_size, descending)
    }
}

/// Delete every event of a subject, walking the full pagination chain.
///
/// Returns the number of events removed.
pub fn purge_subject(store: &dyn EventStore, subject_id: &str, page_size: usize) -> Result<u64> {
    let range = KeyRange::default();
    let mut removed = 0u64;

    loop {
        // Always restart from the head: the previous page is gone.
        let page = store.query_events(subject_id, &range, None, page_size.max(1), false)?;
        if page.items.is_empty() {
            break;
        }

        let keys: Vec<DateTime<Utc>> = page.items.iter().map(|e| e.ordering_key).collect();
        for chunk in keys.chunks(MAX_WRITE_CHUNK) {
            store.delete_events(subject_id, chunk)?;
            removed += chunk.len() as u64;
        }

        if page.next.is_none() {
            break;
        }
    }

    if removed > 0 {
        tracing::debug!(subject_id, removed, "Purged events");
    }

    Ok(removed)
}
