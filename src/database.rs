use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::workflow::{
    ProjectId, SqliteRepository, WorkflowError, WorkflowPolicy, WorkflowStateStore,
};

/// How long a writer waits for another connection's row lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database manager for the project and workflow state tables
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open the configured database, running migrations if enabled
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.url, config.max_connections, config.auto_migrate).await
    }

    /// Open (creating if needed) the SQLite file at `path`
    pub async fn open(
        path: impl AsRef<Path>,
        max_connections: u32,
        auto_migrate: bool,
    ) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if !path.exists() {
            info!("Creating database at {}", path.display());
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let manager = Self { pool };
        if auto_migrate {
            manager.migrate().await?;
        }

        Ok(manager)
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Workflow store backed by this database, resyncing project status
    /// from the `projects` table
    pub fn workflow_store(&self, policy: WorkflowPolicy) -> Result<WorkflowStateStore, WorkflowError> {
        let store = WorkflowStateStore::new(Arc::new(SqliteRepository::new(self.pool.clone())))?;
        Ok(store.with_policy(policy))
    }

    /// Store a project record
    pub async fn insert_project(
        &self,
        project_id: ProjectId,
        title: &str,
        status: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO projects (id, title, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(project_id.0)
        .bind(title)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update a project's authoritative status. Returns false if the project
    /// does not exist.
    pub async fn set_project_status(&self, project_id: ProjectId, status: &str) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE projects SET status = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(project_id.0)
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    /// Delete a project; its workflow state row goes with it
    pub async fn delete_project(&self, project_id: ProjectId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM projects WHERE id = ?1")
            .bind(project_id.0)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}
