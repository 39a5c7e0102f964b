//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Subjects and derived artifacts
    -- ============================================

    CREATE TABLE IF NOT EXISTS logs (
        subject_id       TEXT PRIMARY KEY,
        owner            TEXT NOT NULL,
        filename         TEXT NOT NULL,
        storage_key      TEXT NOT NULL,      -- blob store key, '' when unresolved
        digest           TEXT,               -- SHA-256 hex of uploaded bytes
        size_bytes       INTEGER,
        uploaded_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_logs_owner ON logs(owner, uploaded_at DESC);

    CREATE TABLE IF NOT EXISTS summaries (
        subject_id          TEXT PRIMARY KEY,
        total_lines         INTEGER NOT NULL,
        content_digest      TEXT NOT NULL,
        unique_client_count INTEGER NOT NULL,
        status_counts       JSON NOT NULL,
        top_clients         JSON NOT NULL,
        top_paths           JSON NOT NULL,
        errors_over_time    JSON NOT NULL,
        computed_at         DATETIME NOT NULL
    );

    -- Range key is the ordering key string, fixed width so text order is time order
    CREATE TABLE IF NOT EXISTS events (
        subject_id       TEXT NOT NULL,
        ordering_key     TEXT NOT NULL,
        client           TEXT NOT NULL,
        method           TEXT NOT NULL,
        path             TEXT NOT NULL,
        status           INTEGER NOT NULL,
        bytes            INTEGER NOT NULL,

        PRIMARY KEY (subject_id, ordering_key)
    ) WITHOUT ROWID;

    -- ============================================
    -- Job lifecycle
    -- ============================================

    CREATE TABLE IF NOT EXISTS jobs (
        job_id           TEXT PRIMARY KEY,
        subject_id       TEXT NOT NULL,
        status           TEXT NOT NULL,      -- 'queued', 'running', 'done', 'error'
        created_at       DATETIME NOT NULL,
        started_at       DATETIME,
        finished_at      DATETIME,
        error            TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_subject ON jobs(subject_id, created_at DESC);
    "#,
    // Version 2: Attempt counter for conditional transitions, and the work queue
    r#"
    ALTER TABLE jobs ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;

    CREATE TABLE IF NOT EXISTS work_units (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id           TEXT NOT NULL,
        subject_id       TEXT NOT NULL,
        receipt          TEXT,               -- handle of the current delivery
        visible_at       INTEGER NOT NULL,   -- unix millis; hidden while leased
        deliveries       INTEGER NOT NULL DEFAULT 0,
        enqueued_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_work_units_visible ON work_units(visible_at);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_work_units_receipt ON work_units(receipt);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
