//! Durable job records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::OrchError;
use crate::jobs::fsm::JobFsm;
use crate::models::job::{Job, JobKind, JobOptions, JobScope, JobStatus, Payload};
use crate::store::db::Database;

/// Persistence contract for jobs.
///
/// The executor is the only writer for a given job id once it is created;
/// readers may call `get` at any time.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly built job
    async fn insert(&self, job: &Job) -> Result<(), OrchError>;

    /// Move a job forward, stamping `started_at` / `completed_at` once
    async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), OrchError>;

    /// Replace the progress map wholesale
    async fn set_progress(&self, id: &str, progress: &Payload) -> Result<(), OrchError>;

    /// Replace the results map wholesale
    async fn set_results(&self, id: &str, results: &Payload) -> Result<(), OrchError>;

    async fn get(&self, id: &str) -> Result<Job, OrchError>;

    /// Validate and persist a new `queued` job. Invalid requests never
    /// produce a row.
    async fn create(
        &self,
        kind: JobKind,
        scope: JobScope,
        target: &str,
        owner: &str,
        options: &JobOptions,
    ) -> Result<Job, OrchError> {
        options.validate(kind)?;
        if target.trim().is_empty() {
            return Err(OrchError::InvalidInput("target must not be empty".to_string()));
        }
        let job = Job::new(kind, scope, target, owner, options);
        self.insert(&job).await?;
        debug!("Created job {} ({} on {})", job.id, job.kind, job.target);
        Ok(job)
    }
}

/// SQLite-backed job store
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn current_status(&self, id: &str) -> Result<JobStatus, OrchError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchError::NotFound(format!("job {}", id)))?;
        row.try_get::<String, _>("status")?.parse()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, operation, scope, target, status, dry_run, forced,
                              exclude_filters, owner, created_at, started_at, completed_at,
                              updated_at, progress, results)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.kind.as_str())
        .bind(job.scope.as_str())
        .bind(&job.target)
        .bind(job.status.as_str())
        .bind(job.dry_run)
        .bind(job.force)
        .bind(serde_json::to_string(&job.exclude_filters)?)
        .bind(&job.owner)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(serde_json::to_string(&job.progress)?)
        .bind(serde_json::to_string(&job.results)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), OrchError> {
        let now = Utc::now();
        for from in JobFsm::predecessors(status) {
            let res = sqlx::query(
                r#"
                UPDATE jobs SET
                  status = ?,
                  updated_at = ?,
                  started_at = CASE WHEN ? THEN COALESCE(started_at, ?) ELSE started_at END,
                  completed_at = CASE WHEN ? THEN COALESCE(completed_at, ?) ELSE completed_at END
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(status.as_str())
            .bind(now)
            .bind(status == JobStatus::Running)
            .bind(now)
            .bind(status.is_terminal())
            .bind(now)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

            if res.rows_affected() > 0 {
                return Ok(());
            }
        }

        let current = self.current_status(id).await?;
        Err(OrchError::InvalidInput(format!(
            "job {} cannot move from {} to {}",
            id, current, status
        )))
    }

    async fn set_progress(&self, id: &str, progress: &Payload) -> Result<(), OrchError> {
        let res = sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(progress)?)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(OrchError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn set_results(&self, id: &str, results: &Payload) -> Result<(), OrchError> {
        let res = sqlx::query("UPDATE jobs SET results = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(results)?)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(OrchError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Job, OrchError> {
        let row = sqlx::query(
            r#"
            SELECT id, operation, scope, target, status, dry_run, forced, exclude_filters,
                   owner, created_at, started_at, completed_at, progress, results
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchError::NotFound(format!("job {}", id)))?;
        job_from_row(&row)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, OrchError> {
    let progress: String = row.try_get("progress")?;
    let results: String = row.try_get("results")?;
    let exclude_filters: String = row.try_get("exclude_filters")?;
    Ok(Job {
        id: row.try_get("id")?,
        kind: row.try_get::<String, _>("operation")?.parse()?,
        scope: row.try_get::<String, _>("scope")?.parse()?,
        target: row.try_get("target")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        dry_run: row.try_get("dry_run")?,
        force: row.try_get("forced")?,
        exclude_filters: serde_json::from_str(&exclude_filters)?,
        owner: row.try_get("owner")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        progress: serde_json::from_str(&progress)?,
        results: serde_json::from_str(&results)?,
    })
}
