use thiserror::Error;

use super::transitions::PhaseEvent;
use super::types::{ProjectId, ProjectPhase};

/// Errors surfaced by the workflow state store.
///
/// Missing rows are not errors by default: mutations against a project with
/// no state row return `Ok(None)`. `MissingState` is only produced when the
/// strict policy is enabled.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow state already exists for project {project_id}")]
    DuplicateState { project_id: ProjectId },

    #[error("No workflow state for project {project_id}")]
    MissingState { project_id: ProjectId },

    #[error("Project {project_id} is in terminal phase {phase}; {event} would move it to {target}")]
    TerminalPhase {
        project_id: ProjectId,
        phase: ProjectPhase,
        event: PhaseEvent,
        target: ProjectPhase,
    },

    #[error("No transition from {from} on {event} for project {project_id}")]
    InvalidTransition {
        project_id: ProjectId,
        from: ProjectPhase,
        event: PhaseEvent,
    },

    #[error("Invalid transition table: {reason}")]
    InvalidTransitionTable { reason: String },

    #[error(transparent)]
    InvalidValue(#[from] ParseValueError),

    #[error("Corrupt workflow state row for project {project_id}: {reason}")]
    CorruptRow { project_id: ProjectId, reason: String },

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Malformed enum text coming from a caller or a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {field} value: '{value}'")]
pub struct ParseValueError {
    pub field: &'static str,
    pub value: String,
}

impl ParseValueError {
    pub fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// Failure reading the authoritative project status. Always absorbed by the
/// repository; the previous snapshot value is kept.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream project status unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "database")]
    #[error("Upstream database error: {0}")]
    Database(#[from] sqlx::Error),
}
