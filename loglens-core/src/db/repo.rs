//! Database repository layer
//!
//! Provides query and insert operations for all entity types.

use crate::config::MAX_WRITE_CHUNK;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// Inclusive bounds on an event ordering key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// One page of raw event results.
#[derive(Debug, Clone, Default)]
pub struct StorePage {
    pub items: Vec<AccessEvent>,
    /// Continuation token; `None` when the range is exhausted
    pub next: Option<String>,
}

/// Stored timestamp form. Fixed width so text comparison is chronological.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn parse_opt_ts(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets readers proceed while a worker is writing events
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Log record operations
    // ============================================

    /// Insert or update a log record
    pub fn upsert_log(&self, record: &LogRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO logs (subject_id, owner, filename, storage_key, digest, size_bytes, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(subject_id) DO UPDATE SET
                owner = excluded.owner,
                filename = excluded.filename,
                storage_key = excluded.storage_key,
                digest = excluded.digest,
                size_bytes = excluded.size_bytes,
                uploaded_at = excluded.uploaded_at
            "#,
            params![
                record.subject_id,
                record.owner,
                record.filename,
                record.storage_key,
                record.digest,
                record.size.map(|s| s as i64),
                ts(&record.uploaded_at),
            ],
        )?;
        Ok(())
    }

    /// Get a log record by subject ID
    pub fn get_log(&self, subject_id: &str) -> Result<Option<LogRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM logs WHERE subject_id = ?",
            [subject_id],
            Self::row_to_log,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List log records, newest upload first
    pub fn list_logs(&self, owner: Option<&str>, limit: usize) -> Result<Vec<LogRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM logs WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(owner) = owner {
            sql.push_str(" AND owner = ?");
            params.push(Box::new(owner.to_string()));
        }

        sql.push_str(&format!(
            " ORDER BY uploaded_at DESC, subject_id LIMIT {}",
            limit
        ));

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params_refs.as_slice(), Self::row_to_log)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(logs)
    }

    /// Delete a log record. Returns whether a row was removed.
    pub fn delete_log(&self, subject_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM logs WHERE subject_id = ?", [subject_id])?;
        Ok(removed > 0)
    }

    fn row_to_log(row: &Row) -> rusqlite::Result<LogRecord> {
        let uploaded_at: String = row.get("uploaded_at")?;
        let size: Option<i64> = row.get("size_bytes")?;

        Ok(LogRecord {
            subject_id: row.get("subject_id")?,
            owner: row.get("owner")?,
            filename: row.get("filename")?,
            storage_key: row.get("storage_key")?,
            digest: row.get("digest")?,
            size: size.map(|s| s as u64),
            uploaded_at: parse_ts(&uploaded_at)?,
        })
    }

    // ============================================
    // Job operations
    // ============================================

    /// Insert a new job
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO jobs (job_id, subject_id, status, created_at, started_at, finished_at, error, attempts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                job.job_id,
                job.subject_id,
                job.status.as_str(),
                ts(&job.created_at),
                job.started_at.as_ref().map(ts),
                job.finished_at.as_ref().map(ts),
                job.error,
                job.attempts,
            ],
        )?;
        Ok(())
    }

    /// Get a job by ID
    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM jobs WHERE job_id = ?",
            [job_id],
            Self::row_to_job,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Overwrite a job's mutable fields, conditioned on the stored status and
    /// attempt counter still matching `expected`.
    ///
    /// Returns `false` when the condition did not hold (or the job is gone).
    pub fn replace_job_if(&self, expected: &Job, updated: &Job) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE jobs SET
                status = ?1,
                started_at = ?2,
                finished_at = ?3,
                error = ?4,
                attempts = ?5
            WHERE job_id = ?6 AND status = ?7 AND attempts = ?8
            "#,
            params![
                updated.status.as_str(),
                updated.started_at.as_ref().map(ts),
                updated.finished_at.as_ref().map(ts),
                updated.error,
                updated.attempts,
                expected.job_id,
                expected.status.as_str(),
                expected.attempts,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Jobs for a subject, newest first
    pub fn list_jobs(&self, subject_id: &str, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM jobs
            WHERE subject_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;
        let jobs = stmt
            .query_map(params![subject_id, limit as i64], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;

        Ok(Job {
            job_id: row.get("job_id")?,
            subject_id: row.get("subject_id")?,
            status: status
                .parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?,
            created_at: parse_ts(&created_at)?,
            started_at: parse_opt_ts(row.get("started_at")?)?,
            finished_at: parse_opt_ts(row.get("finished_at")?)?,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
        })
    }

    // ============================================
    // Summary operations
    // ============================================

    /// Insert or overwrite the summary of a subject
    pub fn put_summary(&self, summary: &Summary) -> Result<()> {
        let status_counts = serde_json::to_string(&summary.status_counts)?;
        let top_clients = serde_json::to_string(&summary.top_clients)?;
        let top_paths = serde_json::to_string(&summary.top_paths)?;
        let errors_over_time = serde_json::to_string(&summary.errors_over_time)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO summaries (subject_id, total_lines, content_digest, unique_client_count,
                                              status_counts, top_clients, top_paths, errors_over_time, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                summary.subject_id,
                summary.total_lines as i64,
                summary.content_digest,
                summary.unique_client_count as i64,
                status_counts,
                top_clients,
                top_paths,
                errors_over_time,
                ts(&summary.computed_at),
            ],
        )?;
        Ok(())
    }

    /// Get the summary of a subject
    pub fn get_summary(&self, subject_id: &str) -> Result<Option<Summary>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM summaries WHERE subject_id = ?",
            [subject_id],
            Self::row_to_summary,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Delete the summary of a subject. Returns whether a row was removed.
    pub fn delete_summary(&self, subject_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM summaries WHERE subject_id = ?", [subject_id])?;
        Ok(removed > 0)
    }

    fn row_to_summary(row: &Row) -> rusqlite::Result<Summary> {
        let total_lines: i64 = row.get("total_lines")?;
        let unique_clients: i64 = row.get("unique_client_count")?;
        let status_counts: String = row.get("status_counts")?;
        let top_clients: String = row.get("top_clients")?;
        let top_paths: String = row.get("top_paths")?;
        let errors_over_time: String = row.get("errors_over_time")?;
        let computed_at: String = row.get("computed_at")?;

        Ok(Summary {
            subject_id: row.get("subject_id")?,
            total_lines: total_lines as u64,
            content_digest: row.get("content_digest")?,
            unique_client_count: unique_clients as u64,
            status_counts: from_json(&status_counts)?,
            top_clients: from_json(&top_clients)?,
            top_paths: from_json(&top_paths)?,
            errors_over_time: from_json(&errors_over_time)?,
            computed_at: parse_ts(&computed_at)?,
        })
    }

    // ============================================
    // Event operations
    // ============================================

    /// Write up to [`MAX_WRITE_CHUNK`] events in one request.
    ///
    /// An existing key is overwritten. The request is atomic.
    pub fn put_events(&self, events: &[AccessEvent]) -> Result<()> {
        if events.len() > MAX_WRITE_CHUNK {
            return Err(Error::BatchTooLarge {
                len: events.len(),
                max: MAX_WRITE_CHUNK,
            });
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for event in events {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO events (subject_id, ordering_key, client, method, path, status, bytes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    event.subject_id,
                    format_ordering_key(&event.ordering_key),
                    event.client,
                    event.method,
                    event.path,
                    event.status,
                    event.bytes as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete up to [`MAX_WRITE_CHUNK`] events of one subject by key.
    pub fn delete_events(&self, subject_id: &str, keys: &[DateTime<Utc>]) -> Result<()> {
        if keys.len() > MAX_WRITE_CHUNK {
            return Err(Error::BatchTooLarge {
                len: keys.len(),
                max: MAX_WRITE_CHUNK,
            });
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for key in keys {
            tx.execute(
                "DELETE FROM events WHERE subject_id = ?1 AND ordering_key = ?2",
                params![subject_id, format_ordering_key(key)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Read one page of a subject's events within `range`.
    ///
    /// `start_after` is the continuation token of the previous page. The
    /// returned page carries a token only when more items remain.
    pub fn query_events(
        &self,
        subject_id: &str,
        range: &KeyRange,
        start_after: Option<&str>,
        page_size: usize,
        descending: bool,
    ) -> Result<StorePage> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM events WHERE subject_id = ?");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(subject_id.to_string())];

        if let Some(from) = &range.from {
            sql.push_str(" AND ordering_key >= ?");
            params.push(Box::new(format_ordering_key(from)));
        }

        if let Some(to) = &range.to {
            sql.push_str(" AND ordering_key <= ?");
            params.push(Box::new(format_ordering_key(to)));
        }

        if let Some(token) = start_after {
            sql.push_str(if descending {
                " AND ordering_key < ?"
            } else {
                " AND ordering_key > ?"
            });
            params.push(Box::new(token.to_string()));
        }

        // One extra row tells whether another page exists
        sql.push_str(&format!(
            " ORDER BY ordering_key {} LIMIT {}",
            if descending { "DESC" } else { "ASC" },
            page_size + 1
        ));

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut items = stmt
            .query_map(params_refs.as_slice(), Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next = if items.len() > page_size {
            items.truncate(page_size);
            items.last().map(|e| format_ordering_key(&e.ordering_key))
        } else {
            None
        };

        Ok(StorePage { items, next })
    }

    /// Count all events stored for a subject
    pub fn count_events(&self, subject_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE subject_id = ?",
            [subject_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<AccessEvent> {
        let key: String = row.get("ordering_key")?;
        let bytes: i64 = row.get("bytes")?;

        Ok(AccessEvent {
            subject_id: row.get("subject_id")?,
            ordering_key: parse_ordering_key(&key).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    Type::Text,
                    format!("bad ordering key: {}", key).into(),
                )
            })?,
            client: row.get("client")?,
            method: row.get("method")?,
            path: row.get("path")?,
            status: row.get("status")?,
            bytes: bytes as u64,
        })
    }

    // ============================================
    // Work queue operations
    // ============================================

    /// Append a unit, visible immediately
    pub fn enqueue_unit(&self, unit: &WorkUnit, now: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO work_units (job_id, subject_id, visible_at, enqueued_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                unit.job_id,
                unit.subject_id,
                now.timestamp_millis(),
                ts(&now)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Lease up to `max` visible units, oldest first.
    ///
    /// Each leased unit gets a fresh receipt and stays hidden until
    /// `now + lease`.
    pub fn receive_units(
        &self,
        max: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let visible: Vec<(i64, String, String, u32)> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, job_id, subject_id, deliveries FROM work_units
                WHERE visible_at <= ?1
                ORDER BY id
                LIMIT ?2
                "#,
            )?;
            let rows = stmt
                .query_map(params![now.timestamp_millis(), max as i64], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let hidden_until = (now + lease).timestamp_millis();
        let mut deliveries = Vec::with_capacity(visible.len());

        for (id, job_id, subject_id, previous) in visible {
            let receipt = uuid::Uuid::new_v4().to_string();
            tx.execute(
                r#"
                UPDATE work_units SET receipt = ?1, visible_at = ?2, deliveries = deliveries + 1
                WHERE id = ?3
                "#,
                params![receipt, hidden_until, id],
            )?;
            deliveries.push(Delivery {
                unit: WorkUnit { job_id, subject_id },
                receipt,
                deliveries: previous + 1,
            });
        }

        tx.commit()?;
        Ok(deliveries)
    }

    /// Push a leased unit's visibility out to `now + lease`.
    ///
    /// Returns `false` when the receipt is stale or unknown.
    pub fn extend_unit(&self, receipt: &str, lease: Duration, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE work_units SET visible_at = ?1 WHERE receipt = ?2",
            params![(now + lease).timestamp_millis(), receipt],
        )?;
        Ok(changed > 0)
    }

    /// Remove a unit by the receipt of its current delivery
    pub fn ack_unit(&self, receipt: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM work_units WHERE receipt = ?", [receipt])?;
        Ok(removed > 0)
    }

    /// Units still in the queue, leased or not
    pub fn count_units(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM work_units", [], |r| r.get(0))?;
        Ok(count)
    }
}
