// Project workflow state aggregation
//
// One denormalized state row per project, kept in step with the exam,
// defense-request, meeting and document subsystems that own the facts.

pub mod errors;
pub mod repository;
pub mod store;
pub mod transitions;
pub mod types;
pub mod upstream;


pub use errors::{ParseValueError, UpstreamError, WorkflowError};
pub use repository::{InMemoryRepository, StateMutation, StatusResync, WorkflowStateRepository};
#[cfg(feature = "database")]
pub use repository::SqliteRepository;
pub use store::{WorkflowPolicy, WorkflowStateStore};
pub use transitions::{LifecycleEvent, PhaseEvent, TransitionTable};
pub use types::{
    DefenseStatus, DefenseType, DerivedFlags, ExamResult, ExamType, ProjectId, ProjectPhase,
    ProjectWorkflowState, StateFilter,
};
pub use upstream::{DetachedStatusSource, ProjectStatusSource};
