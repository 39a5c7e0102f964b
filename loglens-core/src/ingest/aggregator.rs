//! Streaming aggregation over an access log
//!
//! Reads the input once, line by line. Memory is bounded by the batch size plus
//! one counter per distinct client, path, status and minute; it does not grow
//! with the number of lines.

use super::{line, timestamp};
use crate::error::Result;
use crate::types::{LogEntry, MinuteCount, RankedEntry, Summary};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

/// Number of entries kept in the top-client and top-path rankings.
pub const TOP_N: usize = 10;

/// Default number of events buffered before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Receiver for full batches of parsed entries.
///
/// A flush that returns an error aborts the stream.
pub trait BatchSink {
    fn flush(&mut self, batch: &[LogEntry]) -> Result<()>;
}

impl<F> BatchSink for F
where
    F: FnMut(&[LogEntry]) -> Result<()>,
{
    fn flush(&mut self, batch: &[LogEntry]) -> Result<()> {
        self(batch)
    }
}

/// Frequency counter that remembers first-seen order for tie breaking.
#[derive(Debug, Default)]
struct Tally {
    counts: HashMap<String, (u64, usize)>,
}

impl Tally {
    fn add(&mut self, key: &str) {
        let next_ordinal = self.counts.len();
        match self.counts.get_mut(key) {
            Some((count, _)) => *count += 1,
            None => {
                self.counts.insert(key.to_string(), (1, next_ordinal));
            }
        }
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    /// The `n` highest counts, descending, ties in first-seen order.
    fn top(&self, n: usize) -> Vec<RankedEntry> {
        let mut entries: Vec<(&String, &(u64, usize))> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        entries
            .into_iter()
            .take(n)
            .map(|(key, (count, _))| RankedEntry {
                key: key.clone(),
                count: *count,
            })
            .collect()
    }
}

/// Running state of one pass over the input.
struct RunningTotals {
    total_lines: u64,
    rejected_lines: u64,
    hasher: Sha256,
    status_counts: BTreeMap<u16, u64>,
    clients: Tally,
    paths: Tally,
    minutes: BTreeMap<String, u64>,
    batch: Vec<LogEntry>,
}

impl RunningTotals {
    fn new(batch_size: usize) -> Self {
        Self {
            total_lines: 0,
            rejected_lines: 0,
            hasher: Sha256::new(),
            status_counts: BTreeMap::new(),
            clients: Tally::default(),
            paths: Tally::default(),
            minutes: BTreeMap::new(),
            batch: Vec::with_capacity(batch_size),
        }
    }

    fn record(&mut self, entry: LogEntry) {
        *self.status_counts.entry(entry.status).or_insert(0) += 1;
        self.clients.add(&entry.client);
        self.paths.add(&entry.path);
        let minute = entry.timestamp.format("%Y-%m-%dT%H:%M").to_string();
        *self.minutes.entry(minute).or_insert(0) += 1;
        self.batch.push(entry);
    }
}

/// Parse and normalize one line into an entry.
pub fn parse_entry(text: &str) -> Option<LogEntry> {
    let fields = line::parse(text)?;
    let timestamp = timestamp::normalize(fields.timestamp)?;
    Some(LogEntry {
        timestamp,
        client: fields.client.to_string(),
        method: fields.method.to_string(),
        path: fields.path.to_string(),
        status: fields.status,
        bytes: fields.bytes,
    })
}

/// Streaming aggregator.
#[derive(Debug, Clone)]
pub struct Aggregator {
    batch_size: usize,
    progress_every: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Aggregator {
    /// Create an aggregator that flushes every `batch_size` events.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            progress_every: 10_000,
        }
    }

    /// Set how many lines pass between progress callbacks.
    pub fn with_progress_every(mut self, lines: u64) -> Self {
        self.progress_every = lines.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Consume `reader` and produce the summary for `subject_id`.
    pub fn run<R, S>(&self, subject_id: &str, reader: R, sink: &mut S) -> Result<Summary>
    where
        R: BufRead,
        S: BatchSink + ?Sized,
    {
        self.run_with_progress(subject_id, reader, sink, |_| {})
    }

    /// Consume `reader` with a progress callback.
    ///
    /// The callback receives the number of lines read so far every
    /// `progress_every` lines.
    pub fn run_with_progress<R, S, F>(
        &self,
        subject_id: &str,
        mut reader: R,
        sink: &mut S,
        mut on_progress: F,
    ) -> Result<Summary>
    where
        R: BufRead,
        S: BatchSink + ?Sized,
        F: FnMut(u64),
    {
        let mut totals = RunningTotals::new(self.batch_size);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }

            // The digest covers the literal bytes, terminator included.
            totals.hasher.update(&buf);
            totals.total_lines += 1;

            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let text = String::from_utf8_lossy(raw);
            match parse_entry(&text) {
                Some(entry) => totals.record(entry),
                None => {
                    totals.rejected_lines += 1;
                    tracing::trace!(line = totals.total_lines, "Rejected line");
                }
            }

            if totals.batch.len() >= self.batch_size {
                sink.flush(&totals.batch)?;
                totals.batch.clear();
            }

            if totals.total_lines % self.progress_every == 0 {
                on_progress(totals.total_lines);
            }
        }

        if !totals.batch.is_empty() {
            sink.flush(&totals.batch)?;
            totals.batch.clear();
        }

        let content_digest = hex::encode(totals.hasher.finalize());

        tracing::debug!(
            subject_id,
            total_lines = totals.total_lines,
            rejected_lines = totals.rejected_lines,
            unique_clients = totals.clients.len(),
            "Aggregation complete"
        );

        Ok(Summary {
            subject_id: subject_id.to_string(),
            total_lines: totals.total_lines,
            content_digest,
            unique_client_count: totals.clients.len() as u64,
            status_counts: totals.status_counts,
            top_clients: totals.clients.top(TOP_N),
            top_paths: totals.paths.top(TOP_N),
            errors_over_time: totals
                .minutes
                .into_iter()
                .map(|(minute, count)| MinuteCount { minute, count })
                .collect(),
            computed_at: Utc::now(),
        })
    }
}
