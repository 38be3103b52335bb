// Authoritative project status reader.
//
// Repositories refresh the `project_status` snapshot while they hold the
// project's row, so a status read and the write that stores it commit as
// one unit. The SQLite repository reads `projects.status` on its own
// transaction; this trait serves repositories with no project table.

use async_trait::async_trait;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use super::errors::UpstreamError;
use super::types::ProjectId;

/// Source of truth for a project's status field.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProjectStatusSource: Send + Sync {
    /// Current status of the project, `None` when the project row is absent
    /// or carries no status.
    async fn project_status(&self, project_id: ProjectId) -> Result<Option<String>, UpstreamError>;
}

/// Status source for embedders with no project table. Always reports no
/// status, so snapshots keep whatever they already hold.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedStatusSource;

#[async_trait]
impl ProjectStatusSource for DetachedStatusSource {
    async fn project_status(&self, _project_id: ProjectId) -> Result<Option<String>, UpstreamError> {
        Ok(None)
    }
}

/// Status to store, or `None` to keep the cached snapshot. Blank values and
/// read failures keep the snapshot; failures are logged and absorbed.
pub(crate) fn usable_status(
    project_id: ProjectId,
    read: Result<Option<String>, UpstreamError>,
) -> Option<String> {
    match read {
        Ok(Some(status)) if !status.trim().is_empty() => Some(status),
        Ok(_) => None,
        Err(e) => {
            warn!(
                project_id = %project_id,
                error = %e,
                "Project status resync failed, keeping cached snapshot"
            );
            None
        }
    }
}
