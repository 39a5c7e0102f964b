//! At-least-once work queue
//!
//! A received unit is leased: it stays invisible to other receivers until its
//! lease lapses, at which point it is delivered again under a new receipt.
//! Acknowledging removes it for good. Nothing counts retries beyond the
//! `deliveries` number carried on each delivery.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Delivery, WorkUnit};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Queue of analysis requests.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, unit: &WorkUnit) -> Result<()>;

    /// Lease up to `max` units for `visibility_secs` seconds.
    fn receive(&self, max: usize, visibility_secs: u64) -> Result<Vec<Delivery>>;

    /// Restart the lease of a delivery from now.
    fn extend_lease(&self, receipt: &str, visibility_secs: u64) -> Result<()>;

    /// Remove a delivered unit.
    fn ack(&self, receipt: &str) -> Result<()>;
}

/// [`WorkQueue`] stored in the `work_units` table.
#[derive(Clone)]
pub struct SqliteWorkQueue {
    db: Arc<Database>,
}

impl SqliteWorkQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Units waiting or in flight
    pub fn depth(&self) -> Result<i64> {
        self.db.count_units()
    }
}

fn lease(visibility_secs: u64) -> Duration {
    Duration::seconds(visibility_secs.min(i64::MAX as u64) as i64)
}

impl WorkQueue for SqliteWorkQueue {
    fn enqueue(&self, unit: &WorkUnit) -> Result<()> {
        let id = self.db.enqueue_unit(unit, Utc::now())?;
        tracing::debug!(id, job_id = %unit.job_id, subject_id = %unit.subject_id, "Enqueued work unit");
        Ok(())
    }

    fn receive(&self, max: usize, visibility_secs: u64) -> Result<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        self.db
            .receive_units(max, lease(visibility_secs), Utc::now())
    }

    fn extend_lease(&self, receipt: &str, visibility_secs: u64) -> Result<()> {
        if self
            .db
            .extend_unit(receipt, lease(visibility_secs), Utc::now())?
        {
            Ok(())
        } else {
            Err(Error::Queue(format!("unknown or expired receipt {}", receipt)))
        }
    }

    fn ack(&self, receipt: &str) -> Result<()> {
        if self.db.ack_unit(receipt)? {
            Ok(())
        } else {
            Err(Error::Queue(format!("unknown or expired receipt {}", receipt)))
        }
    }
}
