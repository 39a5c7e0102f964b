//! Registration and query surface
//!
//! [`LogService`] is what an API layer (or the CLI) talks to. It registers
//! uploads, queues analysis, and answers summary, event and job queries. It
//! never runs an analysis itself; that is the worker's job.

use crate::blob::{storage_key_for, BlobStore};
use crate::config::QueryConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{self, EventStore, QueryEngine};
use crate::jobs::JobCoordinator;
use crate::queue::WorkQueue;
use crate::types::*;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Jobs returned by [`LogService::status`].
const STATUS_HISTORY: usize = 10;

/// Facade over the store, blob store, queue and job coordinator.
#[derive(Clone)]
pub struct LogService {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventStore>,
    queue: Arc<dyn WorkQueue>,
    jobs: JobCoordinator,
    query: QueryConfig,
}

impl LogService {
    pub fn new(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<dyn EventStore>,
        queue: Arc<dyn WorkQueue>,
        query: QueryConfig,
    ) -> Self {
        Self {
            jobs: JobCoordinator::new(db.clone()),
            db,
            blobs,
            events,
            queue,
            query,
        }
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    // ============================================
    // Registration
    // ============================================

    /// Store uploaded content, register it and create a job, without queueing.
    ///
    /// Used when the caller runs the analysis itself.
    pub fn store_upload(&self, owner: &str, filename: &str, content: &[u8]) -> Result<(LogRecord, Job)> {
        let subject_id = Uuid::new_v4().to_string();
        let storage_key = storage_key_for(&subject_id);

        self.blobs.put(&storage_key, content)?;

        let record = LogRecord {
            subject_id: subject_id.clone(),
            owner: owner.to_string(),
            filename: filename.to_string(),
            storage_key,
            digest: Some(hex::encode(Sha256::digest(content))),
            size: Some(content.len() as u64),
            uploaded_at: Utc::now(),
        };
        self.db.upsert_log(&record)?;
        let job = self.jobs.create(&subject_id)?;

        tracing::info!(
            subject_id = %subject_id,
            owner,
            filename,
            bytes = content.len(),
            "Registered upload"
        );
        Ok((record, job))
    }

    /// Store uploaded content and queue it for analysis.
    pub fn register_upload(&self, owner: &str, filename: &str, content: &[u8]) -> Result<Registration> {
        let (record, job) = self.store_upload(owner, filename, content)?;
        self.enqueue(&job)?;
        Ok(Registration {
            subject_id: record.subject_id,
            job_id: job.job_id,
        })
    }

    /// Register a blob that was uploaded out of band, then queue it.
    ///
    /// Re-registering an existing subject updates its metadata.
    pub fn register_existing(
        &self,
        owner: &str,
        subject_id: &str,
        storage_key: &str,
        filename: &str,
        size: Option<u64>,
    ) -> Result<Registration> {
        let record = LogRecord {
            subject_id: subject_id.to_string(),
            owner: owner.to_string(),
            filename: filename.to_string(),
            storage_key: storage_key.to_string(),
            digest: None,
            size,
            uploaded_at: Utc::now(),
        };
        self.db.upsert_log(&record)?;

        let job = self.jobs.create(subject_id)?;
        self.enqueue(&job)?;
        Ok(Registration {
            subject_id: subject_id.to_string(),
            job_id: job.job_id,
        })
    }

    /// Queue a fresh analysis of an existing log.
    pub fn request_analysis(&self, subject_id: &str) -> Result<Job> {
        self.require_log(subject_id)?;
        let job = self.jobs.create(subject_id)?;
        self.enqueue(&job)?;
        Ok(job)
    }

    fn enqueue(&self, job: &Job) -> Result<()> {
        self.queue.enqueue(&WorkUnit {
            job_id: job.job_id.clone(),
            subject_id: job.subject_id.clone(),
        })
    }

    fn require_log(&self, subject_id: &str) -> Result<LogRecord> {
        self.db
            .get_log(subject_id)?
            .ok_or_else(|| Error::LogNotFound(subject_id.to_string()))
    }

    // ============================================
    // Queries
    // ============================================

    /// Summary if available, otherwise whether the subject exists at all.
    pub fn summary_state(&self, subject_id: &str) -> Result<SummaryState> {
        if let Some(summary) = self.db.get_summary(subject_id)? {
            return Ok(SummaryState::Ready(Box::new(summary)));
        }
        if self.db.get_log(subject_id)?.is_none() {
            return Ok(SummaryState::NotFound);
        }
        Ok(SummaryState::Pending {
            latest_job: self.jobs.latest(subject_id)?,
        })
    }

    /// One page of a subject's events. A zero limit means the configured
    /// default; larger limits are capped.
    pub fn events(&self, subject_id: &str, query: &EventQuery) -> Result<EventPage> {
        let mut query = query.clone();
        if query.limit == 0 {
            query.limit = self.query.default_limit;
        }
        query.limit = query.limit.min(self.query.max_limit);

        QueryEngine::new(self.events.as_ref(), self.query.store_page_size).list(subject_id, &query)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>> {
        self.jobs.get(job_id)
    }

    pub fn job_history(&self, subject_id: &str, limit: usize) -> Result<Vec<Job>> {
        self.jobs.history(subject_id, limit)
    }

    /// Summary presence plus recent jobs.
    pub fn status(&self, subject_id: &str) -> Result<SubjectStatus> {
        self.require_log(subject_id)?;
        let jobs = self.jobs.history(subject_id, STATUS_HISTORY)?;
        Ok(SubjectStatus {
            has_summary: self.db.get_summary(subject_id)?.is_some(),
            latest_job: jobs.first().cloned(),
            jobs,
        })
    }

    pub fn list_logs(&self, owner: Option<&str>, limit: usize) -> Result<Vec<LogRecord>> {
        self.db.list_logs(owner, limit)
    }

    pub fn get_log(&self, subject_id: &str) -> Result<Option<LogRecord>> {
        self.db.get_log(subject_id)
    }

    // ============================================
    // Deletion
    // ============================================

    /// Remove a log and everything derived from it: blob, record, summary and
    /// every event. Job history is kept.
    pub fn delete_log(&self, subject_id: &str) -> Result<u64> {
        let record = self.require_log(subject_id)?;

        if !record.storage_key.is_empty() {
            self.blobs.delete(&record.storage_key)?;
        }
        let removed =
            events::purge_subject(self.events.as_ref(), subject_id, self.query.store_page_size)?;
        self.db.delete_summary(subject_id)?;
        self.db.delete_log(subject_id)?;

        tracing::info!(subject_id, events_removed = removed, "Deleted log");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::config::Config;
    use crate::queue::SqliteWorkQueue;
    use crate::runner::Analyzer;
    use tempfile::TempDir;

    const LOG: &str = concat!(
        "10.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET / HTTP/1.0\" 200 10 \"-\" \"curl\"\n",
        "10.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET /a HTTP/1.0\" 404 0 \"-\" \"curl\"\n",
        "10.0.0.2 - - [10/Oct/2000:13:55:40 -0700] \"GET /a HTTP/1.0\" 404 0 \"-\" \"curl\"\n",
        "garbage\n",
    );

    struct Fixture {
        _dir: TempDir,
        db: Arc<Database>,
        blobs: Arc<LocalBlobStore>,
        queue: Arc<SqliteWorkQueue>,
        service: LogService,
        analyzer: Analyzer,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let db = Arc::new(db);
        let blobs = Arc::new(LocalBlobStore::open(dir.path()).unwrap());
        let queue = Arc::new(SqliteWorkQueue::new(db.clone()));
        let config = Config::default();
        let service = LogService::new(
            db.clone(),
            blobs.clone(),
            db.clone(),
            queue.clone(),
            config.query.clone(),
        );
        let analyzer = Analyzer::new(db.clone(), blobs.clone(), db.clone(), &config);
        Fixture {
            _dir: dir,
            db,
            blobs,
            queue,
            service,
            analyzer,
        }
    }

    #[test]
    fn test_register_upload_queues_job() {
        let fx = fixture();
        let reg = fx
            .service
            .register_upload("alice", "access.log", LOG.as_bytes())
            .unwrap();

        let record = fx.service.get_log(&reg.subject_id).unwrap().unwrap();
        assert_eq!(record.owner, "alice");
        assert_eq!(record.size, Some(LOG.len() as u64));
        assert_eq!(
            record.digest.as_deref(),
            Some(hex::encode(Sha256::digest(LOG.as_bytes())).as_str())
        );
        assert_eq!(fx.blobs.fetch(&record.storage_key).unwrap(), LOG.as_bytes());

        let job = fx.service.job(&reg.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let delivered = fx.queue.receive(10, 60).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].unit.job_id, reg.job_id);
    }

    #[test]
    fn test_summary_state_transitions() {
        let fx = fixture();
        assert!(matches!(
            fx.service.summary_state("nope").unwrap(),
            SummaryState::NotFound
        ));

        let reg = fx
            .service
            .register_upload("alice", "access.log", LOG.as_bytes())
            .unwrap();
        match fx.service.summary_state(&reg.subject_id).unwrap() {
            SummaryState::Pending { latest_job } => {
                assert_eq!(latest_job.unwrap().job_id, reg.job_id);
            }
            other => panic!("expected pending, got {:?}", other),
        }

        fx.analyzer.run(&reg.job_id, &reg.subject_id).unwrap();
        match fx.service.summary_state(&reg.subject_id).unwrap() {
            SummaryState::Ready(summary) => {
                assert_eq!(summary.total_lines, 4);
                assert_eq!(summary.status_counts.get(&404), Some(&2));
            }
            other => panic!("expected ready, got {:?}", other),
        }

        // Stored digest matches the one computed by the run
        let record = fx.service.get_log(&reg.subject_id).unwrap().unwrap();
        let summary = fx.db.get_summary(&reg.subject_id).unwrap().unwrap();
        assert_eq!(record.digest.unwrap(), summary.content_digest);
    }

    #[test]
    fn test_events_query_applies_limits() {
        let fx = fixture();
        let reg = fx
            .service
            .register_upload("alice", "access.log", LOG.as_bytes())
            .unwrap();
        fx.analyzer.run(&reg.job_id, &reg.subject_id).unwrap();

        let all = fx
            .service
            .events(&reg.subject_id, &EventQuery { limit: 0, ..Default::default() })
            .unwrap();
        assert_eq!(all.limit, 100);
        assert_eq!(all.items.len(), 3);

        let not_found = fx
            .service
            .events(
                &reg.subject_id,
                &EventQuery {
                    status: Some(404),
                    client: Some("10.0.0.2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(not_found.items.len(), 1);
        assert_eq!(not_found.items[0].path, "/a");

        let capped = fx
            .service
            .events(&reg.subject_id, &EventQuery { limit: 50_000, ..Default::default() })
            .unwrap();
        assert_eq!(capped.limit, 1000);
    }

    #[test]
    fn test_status_and_request_analysis() {
        let fx = fixture();
        assert!(matches!(
            fx.service.request_analysis("missing"),
            Err(Error::LogNotFound(_))
        ));
        assert!(matches!(
            fx.service.status("missing"),
            Err(Error::LogNotFound(_))
        ));

        let reg = fx
            .service
            .register_upload("alice", "access.log", LOG.as_bytes())
            .unwrap();
        fx.analyzer.run(&reg.job_id, &reg.subject_id).unwrap();
        let again = fx.service.request_analysis(&reg.subject_id).unwrap();

        let status = fx.service.status(&reg.subject_id).unwrap();
        assert!(status.has_summary);
        assert_eq!(status.jobs.len(), 2);
        assert_eq!(status.latest_job.unwrap().job_id, again.job_id);
        assert_eq!(fx.service.job_history(&reg.subject_id, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_register_existing_blob() {
        let fx = fixture();
        fx.blobs.put("incoming/abc.log", LOG.as_bytes()).unwrap();

        let reg = fx
            .service
            .register_existing("bob", "abc", "incoming/abc.log", "abc.log", Some(42))
            .unwrap();
        assert_eq!(reg.subject_id, "abc");

        let summary = fx.analyzer.run(&reg.job_id, "abc").unwrap();
        assert_eq!(summary.total_lines, 4);
        assert_eq!(fx.service.list_logs(Some("bob"), 10).unwrap().len(), 1);
        assert!(fx.service.list_logs(Some("carol"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades() {
        let fx = fixture();
        let reg = fx
            .service
            .register_upload("alice", "access.log", LOG.as_bytes())
            .unwrap();
        fx.analyzer.run(&reg.job_id, &reg.subject_id).unwrap();
        let record = fx.service.get_log(&reg.subject_id).unwrap().unwrap();

        let removed = fx.service.delete_log(&reg.subject_id).unwrap();
        assert_eq!(removed, 3);

        assert!(fx.service.get_log(&reg.subject_id).unwrap().is_none());
        assert!(fx.db.get_summary(&reg.subject_id).unwrap().is_none());
        assert_eq!(fx.db.count_events(&reg.subject_id).unwrap(), 0);
        assert!(matches!(
            fx.blobs.fetch(&record.storage_key),
            Err(Error::BlobNotFound(_))
        ));
        assert!(matches!(
            fx.service.summary_state(&reg.subject_id).unwrap(),
            SummaryState::NotFound
        ));
        assert!(matches!(
            fx.service.delete_log(&reg.subject_id),
            Err(Error::LogNotFound(_))
        ));
    }
}
