// Capstone Tracker Library - project workflow state for capstone supervision
// Exposes the workflow store and its storage backends for embedding and tests

pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{CapstoneTrackerConfig, DatabaseConfig, ObservabilityConfig, WorkflowConfig};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use telemetry::{
    create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
    OperationTimer,
};
pub use workflow::{
    DefenseStatus, DefenseType, DerivedFlags, ExamResult, ExamType, LifecycleEvent, ProjectId,
    ProjectPhase, ProjectWorkflowState, StateFilter, WorkflowError, WorkflowPolicy,
    WorkflowStateStore,
};
