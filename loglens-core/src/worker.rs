//! Queue worker
//!
//! Receives work units, runs each on the blocking pool and keeps its queue
//! lease alive while the run is in flight. A unit is acknowledged when its run
//! succeeds or when there is nothing left to do for it; a failed run leaves
//! the unit in the queue so it is redelivered once the lease lapses.

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::runner::Analyzer;
use crate::types::{Delivery, JobStatus, WorkUnit};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The run finished; unit acknowledged
    Completed,
    /// Job already done or gone; unit acknowledged without running
    Skipped,
    /// The run failed; unit left for redelivery
    Failed(String),
}

/// Long-running consumer of the work queue.
pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    analyzer: Analyzer,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: Arc<dyn WorkQueue>, analyzer: Analyzer, config: WorkerConfig) -> Self {
        Self {
            queue,
            analyzer,
            config,
        }
    }

    /// Receive one batch of units and process them concurrently.
    ///
    /// Returns once every unit in the batch has been handled.
    pub async fn poll_once(&self) -> Result<Vec<Outcome>> {
        let deliveries = self
            .queue
            .receive(self.config.max_messages, self.config.visibility_timeout_secs)?;
        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(count = deliveries.len(), "Received work units");

        let mut join_set = JoinSet::new();
        for delivery in deliveries {
            join_set.spawn(process(
                self.queue.clone(),
                self.analyzer.clone(),
                self.config.clone(),
                delivery,
            ));
        }

        let mut outcomes = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Work unit task panicked");
                    outcomes.push(Outcome::Failed(format!("task panic: {}", e)));
                }
            }
        }

        Ok(outcomes)
    }

    /// Poll until `shutdown` resolves. In-flight units always finish first.
    pub async fn run<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tracing::info!(
            max_messages = self.config.max_messages,
            visibility_timeout_secs = self.config.visibility_timeout_secs,
            "Worker started"
        );

        loop {
            let idle = match self.poll_once().await {
                Ok(outcomes) => outcomes.is_empty(),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive work units");
                    true
                }
            };

            let pause = if idle { poll_interval } else { Duration::ZERO };
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }
}

/// Handle one delivery end to end, extending its lease while the run is busy.
async fn process(
    queue: Arc<dyn WorkQueue>,
    analyzer: Analyzer,
    config: WorkerConfig,
    delivery: Delivery,
) -> Outcome {
    let Delivery {
        unit,
        receipt,
        deliveries,
    } = delivery;
    let job_id = unit.job_id.clone();

    tracing::debug!(job_id = %job_id, subject_id = %unit.subject_id, deliveries, "Processing work unit");

    let mut task = tokio::task::spawn_blocking(move || handle(&analyzer, &unit));

    let mut heartbeat = tokio::time::interval(Duration::from_secs(config.lease_extend_secs.max(1)));
    // The first tick fires immediately; the lease is fresh at that point.
    heartbeat.tick().await;

    let outcome = loop {
        tokio::select! {
            joined = &mut task => {
                break joined.unwrap_or_else(|e| Outcome::Failed(format!("task panic: {}", e)));
            }
            _ = heartbeat.tick() => {
                if let Err(e) = queue.extend_lease(&receipt, config.visibility_timeout_secs) {
                    tracing::warn!(job_id = %job_id, error = %e, "Could not extend lease");
                }
            }
        }
    };

    match &outcome {
        Outcome::Completed | Outcome::Skipped => {
            if let Err(e) = queue.ack(&receipt) {
                tracing::warn!(job_id = %job_id, error = %e, "Could not acknowledge work unit");
            }
        }
        Outcome::Failed(reason) => {
            tracing::warn!(job_id = %job_id, deliveries, reason = %reason, "Work unit left for redelivery");
        }
    }

    outcome
}

fn handle(analyzer: &Analyzer, unit: &WorkUnit) -> Outcome {
    match analyzer.jobs().get(&unit.job_id) {
        Ok(None) => {
            tracing::warn!(job_id = %unit.job_id, "Dropping work unit for unknown job");
            Outcome::Skipped
        }
        Ok(Some(job)) if job.status == JobStatus::Done => {
            tracing::info!(job_id = %unit.job_id, "Job already done");
            Outcome::Skipped
        }
        Ok(Some(_)) => match analyzer.run(&unit.job_id, &unit.subject_id) {
            Ok(_) => Outcome::Completed,
            Err(e) => Outcome::Failed(e.to_string()),
        },
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{storage_key_for, BlobStore, LocalBlobStore};
    use crate::config::Config;
    use crate::db::Database;
    use crate::queue::SqliteWorkQueue;
    use crate::types::LogRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    const LOG: &str = concat!(
        "127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET / HTTP/1.0\" 200 10 \"-\" \"curl\"\n",
        "127.0.0.2 - - [10/Oct/2000:13:55:37 -0700] \"GET /x HTTP/1.0\" 500 0 \"-\" \"curl\"\n",
    );

    struct Fixture {
        _dir: TempDir,
        db: Arc<Database>,
        blobs: Arc<LocalBlobStore>,
        queue: Arc<SqliteWorkQueue>,
        worker: Worker,
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
        let analyzer = Analyzer::new(db.clone(), blobs.clone(), db.clone(), &config);
        let worker = Worker::new(queue.clone(), analyzer.clone(), config.worker.clone());
        Fixture {
            _dir: dir,
            db,
            blobs,
            queue,
            worker,
            analyzer,
        }
    }

    fn submit(fx: &Fixture, subject_id: &str, content: Option<&str>) -> String {
        let storage_key = match content {
            Some(content) => {
                let key = storage_key_for(subject_id);
                fx.blobs.put(&key, content.as_bytes()).unwrap();
                key
            }
            None => String::new(),
        };
        fx.db
            .upsert_log(&LogRecord {
                subject_id: subject_id.to_string(),
                owner: "tester".to_string(),
                filename: "access.log".to_string(),
                storage_key,
                digest: None,
                size: None,
                uploaded_at: Utc::now(),
            })
            .unwrap();
        let job = fx.analyzer.jobs().create(subject_id).unwrap();
        fx.queue
            .enqueue(&WorkUnit {
                job_id: job.job_id.clone(),
                subject_id: subject_id.to_string(),
            })
            .unwrap();
        job.job_id
    }

    #[tokio::test]
    async fn test_successful_unit_is_acked() {
        let fx = fixture();
        let job_id = submit(&fx, "s1", Some(LOG));

        let outcomes = fx.worker.poll_once().await.unwrap();
        assert_eq!(outcomes, vec![Outcome::Completed]);
        assert_eq!(fx.queue.depth().unwrap(), 0);

        let job = fx.analyzer.jobs().get(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(fx.db.get_summary("s1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_unit_stays_queued() {
        let fx = fixture();
        let job_id = submit(&fx, "s1", None);

        let outcomes = fx.worker.poll_once().await.unwrap();
        assert!(matches!(outcomes.as_slice(), [Outcome::Failed(_)]));
        assert_eq!(fx.queue.depth().unwrap(), 1);

        let job = fx.analyzer.jobs().get(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);

        // Still leased, so not handed out again yet
        assert!(fx.worker.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_done_and_unknown_jobs_are_skipped() {
        let fx = fixture();
        let job_id = submit(&fx, "s1", Some(LOG));
        fx.analyzer.run(&job_id, "s1").unwrap();

        fx.queue
            .enqueue(&WorkUnit {
                job_id: "vanished".to_string(),
                subject_id: "s1".to_string(),
            })
            .unwrap();

        let outcomes = fx.worker.poll_once().await.unwrap();
        assert_eq!(outcomes, vec![Outcome::Skipped, Outcome::Skipped]);
        assert_eq!(fx.queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_before_shutdown() {
        let fx = fixture();
        let first = submit(&fx, "s1", Some(LOG));
        let second = submit(&fx, "s2", Some(LOG));

        fx.worker.run(std::future::ready(())).await.unwrap();

        for job_id in [first, second] {
            let job = fx.analyzer.jobs().get(&job_id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Done);
        }
        assert_eq!(fx.queue.depth().unwrap(), 0);
    }
}
