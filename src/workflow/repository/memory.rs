//! In-memory implementation of `WorkflowStateRepository`.
//!
//! All state is lost on restart. Every operation takes the same mutex, and
//! the status source is read while it is held, so mutations on one project
//! are serialized together with their status refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StateMutation, StatusResync, WorkflowStateRepository};
use crate::workflow::errors::WorkflowError;
use crate::workflow::types::{ProjectId, ProjectWorkflowState, StateFilter};
use crate::workflow::upstream::{usable_status, DetachedStatusSource, ProjectStatusSource};

pub struct InMemoryRepository {
    states: Mutex<BTreeMap<ProjectId, ProjectWorkflowState>>,
    upstream: Arc<dyn ProjectStatusSource>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::with_status_source(Arc::new(DetachedStatusSource))
    }
}

impl InMemoryRepository {
    /// Repository with no authoritative status; snapshots are never refreshed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_source(upstream: Arc<dyn ProjectStatusSource>) -> Self {
        Self {
            states: Mutex::new(BTreeMap::new()),
            upstream,
        }
    }

    /// Drop a project's row, as the parent project's cascade delete would.
    pub async fn remove(&self, project_id: ProjectId) -> Option<ProjectWorkflowState> {
        self.states.lock().await.remove(&project_id)
    }

    async fn read_status(&self, project_id: ProjectId) -> Option<String> {
        usable_status(project_id, self.upstream.project_status(project_id).await)
    }
}

#[async_trait]
impl WorkflowStateRepository for InMemoryRepository {
    async fn insert(
        &self,
        mut state: ProjectWorkflowState,
    ) -> Result<ProjectWorkflowState, WorkflowError> {
        let mut states = self.states.lock().await;
        if states.contains_key(&state.project_id) {
            return Err(WorkflowError::DuplicateState {
                project_id: state.project_id,
            });
        }

        if let Some(status) = self.read_status(state.project_id).await {
            state.project_status = Some(status);
        }
        states.insert(state.project_id, state.clone());
        Ok(state)
    }

    async fn get(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        Ok(self.states.lock().await.get(&project_id).cloned())
    }

    async fn update(
        &self,
        project_id: ProjectId,
        resync: StatusResync,
        mutation: StateMutation,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let mut states = self.states.lock().await;
        let Some(current) = states.get(&project_id) else {
            return Ok(None);
        };

        // Mutate a copy so a failed mutation leaves the stored row intact.
        let mut next = current.clone();
        if resync == StatusResync::Refresh {
            if let Some(status) = self.read_status(project_id).await {
                next.project_status = Some(status);
            }
        }
        mutation(&mut next)?;
        states.insert(project_id, next.clone());
        Ok(Some(next))
    }

    async fn list(&self, filter: &StateFilter) -> Result<Vec<ProjectWorkflowState>, WorkflowError> {
        let states = self.states.lock().await;
        Ok(states
            .values()
            .filter(|state| filter.matches(state))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::ProjectPhase;
    use chrono::Utc;

    fn row(id: i64) -> ProjectWorkflowState {
        ProjectWorkflowState::new(ProjectId(id), ProjectPhase::Draft, Utc::now())
    }

    fn increment() -> StateMutation {
        Box::new(|state| {
            state.meeting_count += 1;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let repo = InMemoryRepository::new();
        repo.insert(row(1)).await.unwrap();

        let err = repo.insert(row(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateState { project_id } if project_id == ProjectId(1)));
    }

    #[tokio::test]
    async fn test_update_missing_row_skips_mutation() {
        let repo = InMemoryRepository::new();
        let result = repo
            .update(
                ProjectId(7),
                StatusResync::Refresh,
                Box::new(|_| panic!("mutation must not run for a missing row")),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_row_untouched() {
        let repo = InMemoryRepository::new();
        repo.insert(row(2)).await.unwrap();

        let err = repo
            .update(
                ProjectId(2),
                StatusResync::Refresh,
                Box::new(|state| {
                    state.meeting_count = 99;
                    Err(WorkflowError::MissingState {
                        project_id: state.project_id,
                    })
                }),
            )
            .await;
        assert!(err.is_err());

        let stored = repo.get(ProjectId(2)).await.unwrap().unwrap();
        assert_eq!(stored.meeting_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_read_modify_write_loses_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert(row(3)).await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    repo.update(ProjectId(3), StatusResync::Refresh, increment())
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = repo.get(ProjectId(3)).await.unwrap().unwrap();
        assert_eq!(stored.meeting_count, 32);
    }

    #[tokio::test]
    async fn test_keep_skips_status_source() {
        let mut upstream = crate::workflow::upstream::MockProjectStatusSource::new();
        upstream
            .expect_project_status()
            .times(1)
            .returning(|_| Ok(Some("active".to_string())));
        let repo = InMemoryRepository::with_status_source(Arc::new(upstream));

        let inserted = repo.insert(row(4)).await.unwrap();
        assert_eq!(inserted.project_status.as_deref(), Some("active"));

        let updated = repo
            .update(ProjectId(4), StatusResync::Keep, increment())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.project_status.as_deref(), Some("active"));
        assert_eq!(updated.meeting_count, 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_project_id() {
        let repo = InMemoryRepository::new();
        for id in [5, 1, 3] {
            repo.insert(row(id)).await.unwrap();
        }
        let ids: Vec<i64> = repo
            .list(&StateFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.project_id.0)
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);

        assert!(repo.remove(ProjectId(3)).await.is_some());
        assert!(!repo.exists(ProjectId(3)).await.unwrap());
    }
}
