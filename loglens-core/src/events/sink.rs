//! Event sink: assigns ordering keys and writes batches in store-sized chunks.
//!
//! Many requests share a whole-second timestamp. The sink keeps a counter per
//! second for the lifetime of a run and gives the k-th event of a second the
//! key `second + k ms`. Keys stay unique for up to 1000 events per second;
//! beyond that they spill into the following second and may collide with real
//! events there.

use super::EventStore;
use crate::config::MAX_WRITE_CHUNK;
use crate::error::Result;
use crate::ingest::BatchSink;
use crate::types::{AccessEvent, LogEntry};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Run-scoped writer for one subject's events.
pub struct EventSink<'a> {
    store: &'a dyn EventStore,
    subject_id: String,
    chunk_size: usize,
    /// Events seen so far per whole second (unix seconds)
    per_second: HashMap<i64, i64>,
    written: u64,
}

impl<'a> EventSink<'a> {
    pub fn new(store: &'a dyn EventStore, subject_id: impl Into<String>) -> Self {
        Self {
            store,
            subject_id: subject_id.into(),
            chunk_size: MAX_WRITE_CHUNK,
            per_second: HashMap::new(),
            written: 0,
        }
    }

    /// Override the per-request chunk size (clamped to `1..=MAX_WRITE_CHUNK`).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_WRITE_CHUNK);
        self
    }

    /// Events durably written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn ordering_key(&mut self, timestamp: &DateTime<Utc>) -> DateTime<Utc> {
        let second = timestamp.timestamp();
        let seen = self.per_second.entry(second).or_insert(0);
        let k = *seen;
        *seen += 1;

        let whole_second =
            *timestamp - Duration::nanoseconds(i64::from(timestamp.timestamp_subsec_nanos()));
        whole_second + Duration::milliseconds(k)
    }

    /// Key and persist one batch. A failed chunk stops the batch; chunks
    /// already written stay written.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        let events: Vec<AccessEvent> = entries
            .iter()
            .map(|entry| {
                let key = self.ordering_key(&entry.timestamp);
                AccessEvent::from_entry(&self.subject_id, entry, key)
            })
            .collect();

        for chunk in events.chunks(self.chunk_size) {
            if let Err(e) = self.store.put_events(chunk) {
                tracing::warn!(
                    subject_id = %self.subject_id,
                    written = self.written,
                    error = %e,
                    "Event chunk write failed"
                );
                return Err(e);
            }
            self.written += chunk.len() as u64;
        }

        tracing::trace!(
            subject_id = %self.subject_id,
            batch = entries.len(),
            written = self.written,
            "Flushed event batch"
        );

        Ok(())
    }
}

impl BatchSink for EventSink<'_> {
    fn flush(&mut self, batch: &[LogEntry]) -> Result<()> {
        self.append(batch)
    }
}
