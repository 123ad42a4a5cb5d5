//! Append-only deployment stamps

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::errors::OrchError;
use crate::models::stamp::DeploymentStamp;
use crate::store::db::Database;

#[derive(Clone)]
pub struct StampStore {
    pool: SqlitePool,
}

impl StampStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Most recent stamp for a stack
    pub async fn latest(&self, stack_id: i64) -> Result<Option<DeploymentStamp>, OrchError> {
        let row = sqlx::query(
            r#"
            SELECT id, stack_id, deployment_hash, triggered_by, manual, created_at
            FROM deployment_stamps
            WHERE stack_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(stack_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stamp_from_row).transpose()
    }

    /// Append a stamp for a successful deployment
    pub async fn record(
        &self,
        stack_id: i64,
        deployment_hash: &str,
        triggered_by: &str,
        manual: bool,
    ) -> Result<DeploymentStamp, OrchError> {
        let created_at = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO deployment_stamps (stack_id, deployment_hash, triggered_by, manual, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(stack_id)
        .bind(deployment_hash)
        .bind(triggered_by)
        .bind(manual)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(DeploymentStamp {
            id: res.last_insert_rowid(),
            stack_id,
            deployment_hash: deployment_hash.to_string(),
            created_at,
            triggered_by: triggered_by.to_string(),
            manual,
        })
    }

    /// Number of stamps recorded for a stack
    pub async fn count(&self, stack_id: i64) -> Result<i64, OrchError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM deployment_stamps WHERE stack_id = ?")
            .bind(stack_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

fn stamp_from_row(row: &SqliteRow) -> Result<DeploymentStamp, OrchError> {
    Ok(DeploymentStamp {
        id: row.try_get("id")?,
        stack_id: row.try_get("stack_id")?,
        deployment_hash: row.try_get("deployment_hash")?,
        triggered_by: row.try_get("triggered_by")?,
        manual: row.try_get("manual")?,
        created_at: row.try_get("created_at")?,
    })
}
