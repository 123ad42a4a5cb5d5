//! SQLite connection pool and schema bootstrap

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::errors::OrchError;

/// Handle on the orchestrator's relational store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a file-backed database
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OrchError> {
        let url = format!("sqlite://{}", path.as_ref().to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    /// Open an in-memory database. A single connection keeps every query on
    /// the same memory instance.
    pub async fn open_memory() -> Result<Self, OrchError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection; later queries fail with `StoreUnavailable`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bootstrap(&self) -> Result<(), OrchError> {
        // WAL only matters for file databases, ignore failures on memory ones.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_jobs_table().await?;
        self.ensure_stamps_table().await?;
        self.ensure_settings_table().await?;
        self.ensure_catalog_tables().await?;
        debug!("Database schema ready");
        Ok(())
    }

    async fn ensure_jobs_table(&self) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              operation TEXT NOT NULL,
              scope TEXT NOT NULL,
              target TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'queued',
              dry_run INTEGER NOT NULL DEFAULT 0,
              forced INTEGER NOT NULL DEFAULT 0,
              exclude_filters TEXT NOT NULL DEFAULT '{}',
              owner TEXT NOT NULL,
              created_at TEXT NOT NULL,
              started_at TEXT,
              completed_at TEXT,
              updated_at TEXT NOT NULL,
              progress TEXT NOT NULL DEFAULT '{}',
              results TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_stamps_table(&self) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployment_stamps (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              stack_id INTEGER NOT NULL,
              deployment_hash TEXT NOT NULL,
              triggered_by TEXT NOT NULL,
              manual INTEGER NOT NULL DEFAULT 1,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stamps_stack ON deployment_stamps(stack_id, id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_settings_table(&self) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_settings (
              setting_key TEXT PRIMARY KEY,
              setting_value TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_catalog_tables(&self) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
              name TEXT PRIMARY KEY,
              addr TEXT,
              group_names TEXT NOT NULL DEFAULT '[]',
              vars TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS iac_stacks (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              scope_kind TEXT NOT NULL,
              scope_name TEXT NOT NULL,
              stack_name TEXT NOT NULL,
              root TEXT NOT NULL,
              rel_path TEXT NOT NULL,
              UNIQUE (scope_kind, scope_name, stack_name)
            );
            CREATE TABLE IF NOT EXISTS iac_stack_files (
              stack_id INTEGER NOT NULL REFERENCES iac_stacks(id) ON DELETE CASCADE,
              role TEXT NOT NULL,
              rel_path TEXT NOT NULL,
              secret INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (stack_id, rel_path)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
