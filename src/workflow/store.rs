//! Workflow state aggregator.
//!
//! Upstream subsystems call in after committing their own write. Each call
//! has the repository refresh the `project_status` snapshot under its row
//! lock, applies the transition table to the event, stamps audit fields, and
//! writes the row back as one unit.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::errors::WorkflowError;
use super::repository::{StateMutation, StatusResync, WorkflowStateRepository};
use super::transitions::{BlockEffect, LifecycleEvent, PhaseEvent, TransitionTable};
use super::types::{
    activity, DefenseStatus, DefenseType, DerivedFlags, ExamResult, ExamType, ProjectId,
    ProjectPhase, ProjectWorkflowState, StateFilter,
};

/// Behavior knobs for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    /// Fail mutations on a project with no state row instead of returning
    /// `Ok(None)`.
    pub strict_missing_state: bool,
}

pub struct WorkflowStateStore {
    repository: Arc<dyn WorkflowStateRepository>,
    transitions: Arc<TransitionTable>,
    policy: WorkflowPolicy,
}

impl WorkflowStateStore {
    /// Build a store over `repository`, validating the transition table.
    pub fn new(repository: Arc<dyn WorkflowStateRepository>) -> Result<Self, WorkflowError> {
        Ok(Self {
            repository,
            transitions: Arc::new(TransitionTable::new()?),
            policy: WorkflowPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create the project's row in `DRAFT`.
    pub async fn initialize(
        &self,
        project_id: ProjectId,
        actor: Option<&str>,
    ) -> Result<ProjectWorkflowState, WorkflowError> {
        self.initialize_with_phase(project_id, ProjectPhase::Draft, actor)
            .await
    }

    pub async fn initialize_with_phase(
        &self,
        project_id: ProjectId,
        phase: ProjectPhase,
        actor: Option<&str>,
    ) -> Result<ProjectWorkflowState, WorkflowError> {
        let now = Utc::now();
        let mut state = ProjectWorkflowState::new(project_id, phase, now);
        state.stamp_activity(activity::PROJECT_CREATED, actor, now);

        let state = self.repository.insert(state).await?;
        info!(
            project_id = %project_id,
            phase = %phase,
            actor = ?actor,
            "Workflow state initialized"
        );
        Ok(state)
    }

    pub async fn record_exam_result(
        &self,
        project_id: ProjectId,
        exam_type: ExamType,
        result: ExamResult,
        exam_date: Option<NaiveDate>,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let activity = match exam_type {
            ExamType::Topic => activity::TOPIC_EXAM_RECORDED,
            ExamType::Thesis => activity::THESIS_EXAM_RECORDED,
        };

        self.mutate(
            project_id,
            activity,
            actor,
            PhaseEvent::for_exam(exam_type, result),
            move |state| match exam_type {
                ExamType::Topic => {
                    state.topic_exam_result = Some(result);
                    state.topic_exam_date = exam_date;
                }
                ExamType::Thesis => {
                    state.thesis_exam_result = Some(result);
                    state.thesis_exam_date = exam_date;
                }
            },
        )
        .await
    }

    pub async fn record_defense_request(
        &self,
        project_id: ProjectId,
        defense_type: DefenseType,
        request_id: i64,
        status: DefenseStatus,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let activity = match defense_type {
            ExamType::Topic => activity::TOPIC_DEFENSE_RECORDED,
            ExamType::Thesis => activity::THESIS_DEFENSE_RECORDED,
        };
        let event = PhaseEvent::for_defense(defense_type, &status);

        self.mutate(project_id, activity, actor, event, move |state| {
            match defense_type {
                ExamType::Topic => {
                    state.topic_defense_request_id = Some(request_id);
                    state.topic_defense_status = Some(status);
                }
                ExamType::Thesis => {
                    state.thesis_defense_request_id = Some(request_id);
                    state.thesis_defense_status = Some(status);
                }
            }
        })
        .await
    }

    /// Replace both meeting counters with the meeting subsystem's totals.
    pub async fn record_meeting_progress(
        &self,
        project_id: ProjectId,
        meeting_count: u32,
        approved_meeting_count: u32,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        self.mutate(
            project_id,
            activity::MEETING_PROGRESS_RECORDED,
            actor,
            None,
            move |state| {
                state.meeting_count = meeting_count;
                state.approved_meeting_count = approved_meeting_count;
            },
        )
        .await
    }

    pub async fn record_system_test(
        &self,
        project_id: ProjectId,
        request_id: i64,
        status: &str,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let status = status.to_string();
        self.mutate(
            project_id,
            activity::SYSTEM_TEST_RECORDED,
            actor,
            None,
            move |state| {
                state.system_test_request_id = Some(request_id);
                state.system_test_status = Some(status);
            },
        )
        .await
    }

    pub async fn record_final_document(
        &self,
        project_id: ProjectId,
        document_id: i64,
        status: &str,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let status = status.to_string();
        self.mutate(
            project_id,
            activity::FINAL_DOCUMENT_RECORDED,
            actor,
            None,
            move |state| {
                state.final_document_id = Some(document_id);
                state.final_document_status = Some(status);
            },
        )
        .await
    }

    /// Apply an advisory or administrative phase event. Events with no edge
    /// from the current phase are rejected and the row is left unchanged.
    pub async fn apply_lifecycle_event(
        &self,
        project_id: ProjectId,
        event: LifecycleEvent,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let phase_event = event.phase_event();
        self.mutate(project_id, phase_event.as_str(), actor, Some(phase_event), |_| {})
            .await
    }

    pub async fn update_step(
        &self,
        project_id: ProjectId,
        step: Option<String>,
        actor: Option<&str>,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        self.mutate(project_id, activity::STEP_UPDATED, actor, None, move |state| {
            state.current_step = step;
        })
        .await
    }

    /// Write path for the deadline checker. Does not count as project
    /// activity, so audit fields other than `updated_at` are untouched.
    pub async fn mark_overdue(
        &self,
        project_id: ProjectId,
        overdue: bool,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let updated = self
            .repository
            .update(
                project_id,
                StatusResync::Keep,
                Box::new(move |state| {
                    state.is_overdue = overdue;
                    state.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;

        match updated {
            Some(state) => Ok(Some(state)),
            None => self.missing(project_id),
        }
    }

    pub async fn get(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        self.repository.get(project_id).await
    }

    /// Existence check for callers that want strict handling before a
    /// mutation.
    pub async fn exists(&self, project_id: ProjectId) -> Result<bool, WorkflowError> {
        self.repository.exists(project_id).await
    }

    pub async fn derived_flags(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<DerivedFlags>, WorkflowError> {
        Ok(self
            .repository
            .get(project_id)
            .await?
            .map(|state| state.derived_flags()))
    }

    pub async fn list(
        &self,
        filter: &StateFilter,
    ) -> Result<Vec<ProjectWorkflowState>, WorkflowError> {
        self.repository.list(filter).await
    }

    async fn mutate<F>(
        &self,
        project_id: ProjectId,
        activity: &'static str,
        actor: Option<&str>,
        event: Option<PhaseEvent>,
        apply: F,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError>
    where
        F: FnOnce(&mut ProjectWorkflowState) + Send + 'static,
    {
        let transitions = Arc::clone(&self.transitions);
        let actor = actor.map(str::to_string);

        let mutation: StateMutation = Box::new(move |state| {
            if let Some(event) = event {
                let from = state.current_phase;
                let to = transitions.resolve(state.project_id, from, event)?;
                state.current_phase = to;

                match event.block_effect() {
                    BlockEffect::Block(reason) => state.block(reason),
                    BlockEffect::Clear => state.unblock(),
                    BlockEffect::Keep => {}
                }

                if from != to {
                    info!(
                        project_id = %state.project_id,
                        from = %from,
                        to = %to,
                        event = %event,
                        "Workflow phase advanced"
                    );
                }
            }

            apply(state);
            state.stamp_activity(activity, actor.as_deref(), Utc::now());
            Ok(())
        });

        match self
            .repository
            .update(project_id, StatusResync::Refresh, mutation)
            .await?
        {
            Some(state) => {
                debug!(project_id = %project_id, activity, phase = %state.current_phase, "Workflow state updated");
                Ok(Some(state))
            }
            None => self.missing(project_id),
        }
    }

    fn missing(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        if self.policy.strict_missing_state {
            return Err(WorkflowError::MissingState { project_id });
        }
        warn!(project_id = %project_id, "No workflow state for project, event ignored");
        Ok(None)
    }
}
