//! Auto-apply override settings at global, group, host and stack scope

use std::fmt;

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::OrchError;
use crate::store::db::Database;
use crate::utils::parse_truthy;

/// Where an override is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideScope {
    Global,
    Group(String),
    Host(String),
    Stack(i64),
}

impl OverrideScope {
    fn key(&self) -> String {
        match self {
            OverrideScope::Global => "devops_apply".to_string(),
            OverrideScope::Group(name) => format!("group:{}:devops_apply", name),
            OverrideScope::Host(name) => format!("host:{}:devops_apply", name),
            OverrideScope::Stack(id) => format!("stack:{}:devops_apply", id),
        }
    }
}

impl fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideScope::Global => f.write_str("global"),
            OverrideScope::Group(name) => write!(f, "group {}", name),
            OverrideScope::Host(name) => write!(f, "host {}", name),
            OverrideScope::Stack(id) => write!(f, "stack {}", id),
        }
    }
}

/// Tri-state override values; an absent row means "inherit".
/// Read fresh on every call, nothing is cached.
#[derive(Clone)]
pub struct OverrideStore {
    pool: SqlitePool,
}

impl OverrideStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn get(&self, scope: &OverrideScope) -> Result<Option<bool>, OrchError> {
        let row = sqlx::query("SELECT setting_value FROM app_settings WHERE setting_key = ?")
            .bind(scope.key())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("setting_value")?;
                Ok(parse_truthy(&raw))
            }
            None => Ok(None),
        }
    }

    /// Store an override, or clear it with `None`
    pub async fn set(&self, scope: &OverrideScope, value: Option<bool>) -> Result<(), OrchError> {
        match value {
            Some(v) => {
                sqlx::query(
                    r#"
                    INSERT INTO app_settings (setting_key, setting_value, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(setting_key) DO UPDATE SET
                      setting_value = excluded.setting_value,
                      updated_at = excluded.updated_at
                    "#,
                )
                .bind(scope.key())
                .bind(if v { "true" } else { "false" })
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM app_settings WHERE setting_key = ?")
                    .bind(scope.key())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
