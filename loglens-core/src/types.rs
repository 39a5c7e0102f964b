//! Core domain types for loglens
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Subject** | One uploaded log and everything derived from it, keyed by `subject_id` |
//! | **LogRecord** | Registration metadata for a subject (owner, storage key, digest) |
//! | **AccessEvent** | One parsed request line, stored under a per-subject ordering key |
//! | **Ordering key** | Millisecond UTC instant, unique per subject, derived from the request time |
//! | **Summary** | Aggregates computed by one complete analysis run |
//! | **Job** | One analysis run and its lifecycle state |
//! | **WorkUnit** | A `{job_id, subject_id}` message delivered by the work queue |
//!
//! A [`LogRecord`] is the root of ownership. Jobs and summaries reference it by
//! `subject_id` only; events have no identity outside their subject partition.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================
// Events
// ============================================

/// A request line after parsing and timestamp normalization, before it has
/// been assigned an ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Request time in UTC
    pub timestamp: DateTime<Utc>,
    /// Client address as written in the log
    pub client: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Response status
    pub status: u16,
    /// Response size (`-` is stored as 0)
    pub bytes: u64,
}

/// A persisted access event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Owning subject
    pub subject_id: String,
    /// Unique, time-derived sort key within the subject
    pub ordering_key: DateTime<Utc>,
    /// Client address
    pub client: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Response status
    pub status: u16,
    /// Response size
    pub bytes: u64,
}

impl AccessEvent {
    /// Build an event for `subject_id` from a parsed entry and its assigned key.
    pub fn from_entry(subject_id: &str, entry: &LogEntry, ordering_key: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            ordering_key,
            client: entry.client.clone(),
            method: entry.method.clone(),
            path: entry.path.clone(),
            status: entry.status,
            bytes: entry.bytes,
        }
    }
}

/// Render an ordering key in its stored form, `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// The width is fixed so lexical order matches chronological order.
pub fn format_ordering_key(key: &DateTime<Utc>) -> String {
    key.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored ordering key.
pub fn parse_ordering_key(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================
// Summary
// ============================================

/// A key and how often it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub key: String,
    pub count: u64,
}

/// Number of parsed events within one UTC minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteCount {
    /// Minute bucket, `YYYY-MM-DDTHH:MM`
    pub minute: String,
    pub count: u64,
}

/// Aggregates produced by one complete analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub subject_id: String,
    /// Every line read, parsed or not
    pub total_lines: u64,
    /// Lower-case hex SHA-256 of the exact input bytes
    pub content_digest: String,
    pub unique_client_count: u64,
    /// Status code to count; sums to the number of parsed lines
    pub status_counts: BTreeMap<u16, u64>,
    /// At most ten clients, count descending, ties in first-seen order
    pub top_clients: Vec<RankedEntry>,
    /// At most ten paths, count descending, ties in first-seen order
    pub top_paths: Vec<RankedEntry>,
    /// Parsed events per UTC minute, chronological
    pub errors_over_time: Vec<MinuteCount>,
    pub computed_at: DateTime<Utc>,
}

impl Summary {
    /// Number of lines that parsed and normalized successfully.
    pub fn parsed_lines(&self) -> u64 {
        self.status_counts.values().sum()
    }
}

/// What the query surface knows about a subject's summary.
#[derive(Debug, Clone)]
pub enum SummaryState {
    /// No such subject
    NotFound,
    /// Subject exists but no run has completed; carries the latest job, if any
    Pending { latest_job: Option<Job> },
    /// Summary available
    Ready(Box<Summary>),
}

// ============================================
// Jobs
// ============================================

/// Lifecycle state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// Transition table.
    ///
    /// `Running -> Running` reclaims a job whose worker lost its queue lease and
    /// `Error -> Running` retries a redelivered failure. `Done` is terminal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Error, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    /// Whether no further run is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("unknown job status: {}", s)),
        }
    }
}

/// One analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub subject_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure message when `status` is `Error`
    pub error: Option<String>,
    /// Times the job has entered `Running`
    pub attempts: u32,
}

// ============================================
// Log records
// ============================================

/// Registration metadata for an uploaded log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub subject_id: String,
    /// Opaque identity supplied by the identity collaborator
    pub owner: String,
    /// Original file name
    pub filename: String,
    /// Blob store key; empty when the upload never completed
    pub storage_key: String,
    /// SHA-256 of the uploaded bytes, when known
    pub digest: Option<String>,
    /// Size in bytes, when known
    pub size: Option<u64>,
    pub uploaded_at: DateTime<Utc>,
}

/// Identifiers returned when an upload is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub subject_id: String,
    pub job_id: String,
}

/// Job overview for a subject.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectStatus {
    pub has_summary: bool,
    pub latest_job: Option<Job>,
    pub jobs: Vec<Job>,
}

// ============================================
// Queue
// ============================================

/// Payload of a queued analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub job_id: String,
    pub subject_id: String,
}

/// A work unit handed out by the queue together with its lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub unit: WorkUnit,
    /// Handle identifying this particular delivery; required to extend or ack
    pub receipt: String,
    /// How many times the unit has been delivered, including this one
    pub deliveries: u32,
}

// ============================================
// Queries
// ============================================

/// Filters and paging for listing a subject's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// 1-based page number
    pub page: usize,
    /// Items per page
    pub limit: usize,
    /// Exact client address
    pub client: Option<String>,
    /// Exact status code
    pub status: Option<u16>,
    /// Inclusive lower bound on the ordering key
    pub time_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the ordering key
    pub time_to: Option<DateTime<Utc>>,
    /// Newest first
    pub descending: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 100,
            client: None,
            status: None,
            time_from: None,
            time_to: None,
            descending: false,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub page: usize,
    pub limit: usize,
    /// Matching items among those fetched so far
    pub total: usize,
    pub items: Vec<AccessEvent>,
    /// The whole store chain was walked, so `total` is exact
    pub exhausted: bool,
}

/// Parse a user-supplied time bound.
///
/// Accepts RFC 3339 (`2000-10-10T20:55:36Z`, with or without fraction/offset)
/// or a naive `YYYY-MM-DDTHH:MM[:SS]` interpreted as UTC.
pub fn parse_time_bound(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
