//! Storage abstraction for workflow state rows.
//!
//! The store never reads a row, decides, and writes it back in separate
//! calls. It hands the repository a mutation closure instead, and each
//! implementation runs read, status refresh, mutation and write as one unit
//! under its own locking: a single async mutex in memory, a write-claimed
//! transaction in SQLite. A mutation that returns an error leaves the row as
//! it was.

mod memory;
#[cfg(feature = "database")]
mod sqlite;

pub use memory::InMemoryRepository;
#[cfg(feature = "database")]
pub use sqlite::SqliteRepository;

use async_trait::async_trait;

use super::errors::WorkflowError;
use super::types::{ProjectId, ProjectWorkflowState, StateFilter};

/// Read-modify-write step applied to a locked row.
pub type StateMutation =
    Box<dyn FnOnce(&mut ProjectWorkflowState) -> Result<(), WorkflowError> + Send>;

/// Whether an update re-reads the authoritative project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusResync {
    /// Read the status after the row is locked and store it before the
    /// mutation runs. A blank or failed read keeps the cached value.
    Refresh,
    /// Leave `project_status` as stored.
    Keep,
}

#[async_trait]
pub trait WorkflowStateRepository: Send + Sync {
    /// Create the row for a project, seeding `project_status` from the
    /// authoritative source in the same unit. Fails with `DuplicateState` if
    /// a row already exists; never overwrites.
    async fn insert(
        &self,
        state: ProjectWorkflowState,
    ) -> Result<ProjectWorkflowState, WorkflowError>;

    async fn get(&self, project_id: ProjectId)
        -> Result<Option<ProjectWorkflowState>, WorkflowError>;

    /// Apply `mutation` to the row under the repository's row lock.
    ///
    /// Returns `Ok(None)` without calling `mutation` when no row exists.
    async fn update(
        &self,
        project_id: ProjectId,
        resync: StatusResync,
        mutation: StateMutation,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError>;

    /// Rows matching `filter`, ordered by project id.
    async fn list(&self, filter: &StateFilter) -> Result<Vec<ProjectWorkflowState>, WorkflowError>;

    async fn exists(&self, project_id: ProjectId) -> Result<bool, WorkflowError> {
        Ok(self.get(project_id).await?.is_some())
    }
}
