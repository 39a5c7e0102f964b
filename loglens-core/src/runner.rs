//! Analysis runner
//!
//! Wraps one complete run for a job:
//!
//! ```text
//! start ─► resolve log record ─► fetch blob ─► clear old events
//!                                                   │
//!           finish ◄─ write summary ◄─ aggregate + sink events
//! ```
//!
//! Any failure after `start` marks the job `error` with the failure text and is
//! returned to the caller. A failed run never writes a summary, though events
//! flushed before the failure stay until the next attempt clears them.

use crate::blob::BlobStore;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{self, EventSink, EventStore};
use crate::ingest::Aggregator;
use crate::jobs::JobCoordinator;
use crate::logging;
use crate::types::Summary;
use std::io::{BufRead, Cursor};
use std::sync::Arc;

/// Executes analysis jobs against the configured collaborators.
#[derive(Clone)]
pub struct Analyzer {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventStore>,
    jobs: JobCoordinator,
    aggregator: Aggregator,
    write_chunk_size: usize,
    store_page_size: usize,
}

impl Analyzer {
    pub fn new(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<dyn EventStore>,
        config: &Config,
    ) -> Self {
        Self {
            jobs: JobCoordinator::new(db.clone()),
            db,
            blobs,
            events,
            aggregator: Aggregator::new(config.ingest.batch_size)
                .with_progress_every(config.ingest.progress_every),
            write_chunk_size: config.ingest.write_chunk_size,
            store_page_size: config.query.store_page_size,
        }
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    /// Run job `job_id` for `subject_id`.
    pub fn run(&self, job_id: &str, subject_id: &str) -> Result<Summary> {
        self.run_with_progress(job_id, subject_id, |_| {})
    }

    /// Run a job, reporting lines read to `on_progress`.
    pub fn run_with_progress<F>(&self, job_id: &str, subject_id: &str, on_progress: F) -> Result<Summary>
    where
        F: FnMut(u64),
    {
        let span = logging::run_span(job_id, subject_id);
        let _entered = span.enter();

        let job = self.jobs.start(job_id)?;
        tracing::info!(attempt = job.attempts, "Analysis started");

        match self.execute(subject_id, on_progress) {
            Ok(summary) => {
                if let Err(e) = self.jobs.finish(job_id, job.attempts) {
                    tracing::warn!(attempt = job.attempts, error = %e, "Run superseded before it finished");
                    return Err(e);
                }
                tracing::info!(
                    total_lines = summary.total_lines,
                    parsed_lines = summary.parsed_lines(),
                    "Analysis finished"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, "Analysis failed");
                if let Err(mark_err) = self.jobs.fail(job_id, job.attempts, &e.to_string()) {
                    tracing::warn!(error = %mark_err, "Could not record job failure");
                }
                Err(e)
            }
        }
    }

    fn execute<F>(&self, subject_id: &str, on_progress: F) -> Result<Summary>
    where
        F: FnMut(u64),
    {
        let record = self
            .db
            .get_log(subject_id)?
            .ok_or_else(|| Error::MissingSource(subject_id.to_string()))?;
        if record.storage_key.is_empty() {
            return Err(Error::MissingSource(subject_id.to_string()));
        }

        let content = self.blobs.fetch(&record.storage_key)?;

        // A redelivered run starts from an empty partition
        events::purge_subject(self.events.as_ref(), subject_id, self.store_page_size)?;

        let summary = self.analyze_reader(subject_id, Cursor::new(content), on_progress)?;

        if let Some(expected) = &record.digest {
            if *expected != summary.content_digest {
                tracing::warn!(
                    subject_id,
                    expected = %expected,
                    actual = %summary.content_digest,
                    "Content digest differs from the one recorded at upload"
                );
            }
        }

        self.db.put_summary(&summary)?;
        Ok(summary)
    }

    /// Aggregate `reader` and persist its events, without touching jobs or
    /// the summary table.
    pub fn analyze_reader<R, F>(&self, subject_id: &str, reader: R, on_progress: F) -> Result<Summary>
    where
        R: BufRead,
        F: FnMut(u64),
    {
        let mut sink =
            EventSink::new(self.events.as_ref(), subject_id).with_chunk_size(self.write_chunk_size);
        let summary = self
            .aggregator
            .run_with_progress(subject_id, reader, &mut sink, on_progress)?;

        tracing::debug!(subject_id, events_written = sink.written(), "Events persisted");
        Ok(summary)
    }
}
