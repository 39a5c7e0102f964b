//! Startup wiring shared by the loglens binaries.

use anyhow::{Context as _, Result};
use loglens_core::logging::{self, LoggingGuard};
use loglens_core::{Analyzer, Config, Database, LocalBlobStore, LogService, SqliteWorkQueue};
use std::sync::Arc;

/// Collaborators built once per process and handed out explicitly.
pub struct AppContext {
    pub config: Config,
    pub db: Arc<Database>,
    pub blobs: Arc<LocalBlobStore>,
    pub queue: Arc<SqliteWorkQueue>,
    _log_guard: LoggingGuard,
}

impl AppContext {
    /// Load config, start logging and open the store.
    pub fn init(binary: &str) -> Result<Self> {
        let config = Config::load().context("failed to load configuration")?;
        let log_guard = logging::init(&config.logging).context("failed to initialize logging")?;

        tracing::info!(binary, "loglens starting up");

        let db_path = config.database_path();
        tracing::info!(path = %db_path.display(), "Opening database");
        let db = Database::open(&db_path).context("failed to open database")?;
        db.migrate().context("failed to run database migrations")?;
        let db = Arc::new(db);

        let blobs = Arc::new(
            LocalBlobStore::open(config.blob_dir()).context("failed to open blob store")?,
        );
        let queue = Arc::new(SqliteWorkQueue::new(db.clone()));

        Ok(Self {
            config,
            db,
            blobs,
            queue,
            _log_guard: log_guard,
        })
    }

    pub fn service(&self) -> LogService {
        LogService::new(
            self.db.clone(),
            self.blobs.clone(),
            self.db.clone(),
            self.queue.clone(),
            self.config.query.clone(),
        )
    }

    pub fn analyzer(&self) -> Analyzer {
        Analyzer::new(
            self.db.clone(),
            self.blobs.clone(),
            self.db.clone(),
            &self.config,
        )
    }
}
