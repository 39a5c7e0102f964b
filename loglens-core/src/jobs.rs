//! Analysis job lifecycle
//!
//! A job moves `queued -> running -> done | error`. Redelivered work may move a
//! `running` job (lost lease) or an `error` job (failed attempt) back into
//! `running`. Every transition is a conditional update on the status and
//! attempt counter the caller observed, so two workers racing on one job
//! cannot both win. `finish` and `fail` also name the attempt returned by
//! `start`; once another worker has reclaimed the job that attempt is stale
//! and the transition is refused.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Job, JobStatus};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Creates jobs and drives their status transitions.
#[derive(Clone)]
pub struct JobCoordinator {
    db: Arc<Database>,
}

impl JobCoordinator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new `queued` job for `subject_id`.
    pub fn create(&self, subject_id: &str) -> Result<Job> {
        let job = Job {
            job_id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            attempts: 0,
        };
        self.db.insert_job(&job)?;

        tracing::info!(job_id = %job.job_id, subject_id, "Job queued");
        Ok(job)
    }

    /// Move a job into `running` and count the attempt.
    pub fn start(&self, job_id: &str) -> Result<Job> {
        self.transition(job_id, None, JobStatus::Running, |job| {
            job.started_at = Some(Utc::now());
            job.finished_at = None;
            job.error = None;
            job.attempts += 1;
        })
    }

    /// Mark attempt `attempt` of a running job as done.
    pub fn finish(&self, job_id: &str, attempt: u32) -> Result<Job> {
        self.transition(job_id, Some(attempt), JobStatus::Done, |job| {
            job.finished_at = Some(Utc::now());
            job.error = None;
        })
    }

    /// Mark attempt `attempt` of a running job as failed with `message`.
    pub fn fail(&self, job_id: &str, attempt: u32, message: &str) -> Result<Job> {
        self.transition(job_id, Some(attempt), JobStatus::Error, |job| {
            job.finished_at = Some(Utc::now());
            job.error = Some(message.to_string());
        })
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.db.get_job(job_id)
    }

    /// Jobs for a subject, newest first.
    pub fn history(&self, subject_id: &str, limit: usize) -> Result<Vec<Job>> {
        self.db.list_jobs(subject_id, limit)
    }

    /// Most recently created job for a subject.
    pub fn latest(&self, subject_id: &str) -> Result<Option<Job>> {
        Ok(self.db.list_jobs(subject_id, 1)?.into_iter().next())
    }

    fn transition<F>(&self, job_id: &str, attempt: Option<u32>, to: JobStatus, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let current = self
            .db
            .get_job(job_id)?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if let Some(attempt) = attempt {
            if current.attempts != attempt {
                tracing::warn!(
                    job_id,
                    attempt,
                    current_attempt = current.attempts,
                    to = %to,
                    "Stale attempt refused"
                );
                return Err(Error::TransitionConflict(job_id.to_string()));
            }
        }

        if !current.status.can_transition_to(to) {
            return Err(Error::IllegalTransition {
                job_id: job_id.to_string(),
                from: current.status,
                to,
            });
        }

        let mut updated = current.clone();
        updated.status = to;
        apply(&mut updated);

        if !self.db.replace_job_if(&current, &updated)? {
            tracing::warn!(job_id, from = %current.status, to = %to, "Lost job transition race");
            return Err(Error::TransitionConflict(job_id.to_string()));
        }

        tracing::debug!(
            job_id,
            from = %current.status,
            to = %to,
            attempts = updated.attempts,
            "Job transition"
        );
        Ok(updated)
    }
}
