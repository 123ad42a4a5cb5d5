//! Host inventory and stack catalog

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::errors::OrchError;
use crate::models::inventory::{Host, InventoryFile, ScopeKind, Stack, StackFile};
use crate::store::db::Database;

/// Source of the managed host list
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list_hosts(&self) -> Result<Vec<Host>, OrchError>;

    async fn get_host(&self, name: &str) -> Result<Host, OrchError>;
}

/// Resolves stacks to their repository root and tracked files
#[async_trait]
pub trait StackCatalog: Send + Sync {
    async fn resolve(&self, stack_id: i64) -> Result<Stack, OrchError>;

    async fn list_stacks(&self) -> Result<Vec<Stack>, OrchError>;
}

/// SQLite-backed catalog of hosts and stacks
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Insert or replace a host
    pub async fn upsert_host(&self, host: &Host) -> Result<(), OrchError> {
        sqlx::query(
            r#"
            INSERT INTO hosts (name, addr, group_names, vars) VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
              addr = excluded.addr,
              group_names = excluded.group_names,
              vars = excluded.vars
            "#,
        )
        .bind(&host.name)
        .bind(&host.addr)
        .bind(serde_json::to_string(&host.groups)?)
        .bind(serde_json::to_string(&host.vars)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a stack and replace its tracked files. Returns the
    /// stack id, stable across re-imports.
    pub async fn upsert_stack(&self, stack: &Stack) -> Result<i64, OrchError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO iac_stacks (scope_kind, scope_name, stack_name, root, rel_path)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scope_kind, scope_name, stack_name) DO UPDATE SET
              root = excluded.root,
              rel_path = excluded.rel_path
            RETURNING id
            "#,
        )
        .bind(stack.scope_kind.as_str())
        .bind(&stack.scope_name)
        .bind(&stack.name)
        .bind(stack.root.to_string_lossy().to_string())
        .bind(&stack.rel_path)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM iac_stack_files WHERE stack_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for file in &stack.files {
            sqlx::query(
                "INSERT INTO iac_stack_files (stack_id, role, rel_path, secret) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(file.role.as_str())
            .bind(&file.rel_path)
            .bind(file.secret)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Load hosts and stacks from an inventory file
    pub async fn import(&self, inventory: &InventoryFile) -> Result<(), OrchError> {
        for host in &inventory.hosts {
            self.upsert_host(host).await?;
        }
        for stack in &inventory.stacks {
            self.upsert_stack(stack).await?;
        }
        info!(
            "Imported {} hosts and {} stacks",
            inventory.hosts.len(),
            inventory.stacks.len()
        );
        Ok(())
    }

    async fn stack_files(&self, stack_id: i64) -> Result<Vec<StackFile>, OrchError> {
        let rows = sqlx::query(
            "SELECT role, rel_path, secret FROM iac_stack_files WHERE stack_id = ? ORDER BY rel_path",
        )
        .bind(stack_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StackFile {
                    role: row.try_get::<String, _>("role")?.parse()?,
                    rel_path: row.try_get("rel_path")?,
                    secret: row.try_get("secret")?,
                })
            })
            .collect()
    }

    async fn stack_from_row(&self, row: &SqliteRow) -> Result<Stack, OrchError> {
        let id: i64 = row.try_get("id")?;
        let root: String = row.try_get("root")?;
        Ok(Stack {
            id,
            scope_kind: row.try_get::<String, _>("scope_kind")?.parse::<ScopeKind>()?,
            scope_name: row.try_get("scope_name")?,
            name: row.try_get("stack_name")?,
            root: PathBuf::from(root),
            rel_path: row.try_get("rel_path")?,
            files: self.stack_files(id).await?,
        })
    }
}

fn host_from_row(row: &SqliteRow) -> Result<Host, OrchError> {
    let groups: String = row.try_get("group_names")?;
    let vars: String = row.try_get("vars")?;
    Ok(Host {
        name: row.try_get("name")?,
        addr: row.try_get("addr")?,
        groups: serde_json::from_str(&groups)?,
        vars: serde_json::from_str::<HashMap<String, String>>(&vars)?,
    })
}

#[async_trait]
impl Inventory for SqliteCatalog {
    async fn list_hosts(&self) -> Result<Vec<Host>, OrchError> {
        let rows = sqlx::query("SELECT name, addr, group_names, vars FROM hosts ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(host_from_row).collect()
    }

    async fn get_host(&self, name: &str) -> Result<Host, OrchError> {
        let row = sqlx::query("SELECT name, addr, group_names, vars FROM hosts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchError::NotFound(format!("host {}", name)))?;
        host_from_row(&row)
    }
}

#[async_trait]
impl StackCatalog for SqliteCatalog {
    async fn resolve(&self, stack_id: i64) -> Result<Stack, OrchError> {
        let row = sqlx::query(
            "SELECT id, scope_kind, scope_name, stack_name, root, rel_path FROM iac_stacks WHERE id = ?",
        )
        .bind(stack_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchError::NotFound(format!("stack {}", stack_id)))?;
        self.stack_from_row(&row).await
    }

    async fn list_stacks(&self) -> Result<Vec<Stack>, OrchError> {
        let rows = sqlx::query(
            "SELECT id, scope_kind, scope_name, stack_name, root, rel_path FROM iac_stacks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stacks = Vec::with_capacity(rows.len());
        for row in &rows {
            stacks.push(self.stack_from_row(row).await?);
        }
        Ok(stacks)
    }
}
