use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ParseValueError;

/// Block reason written by a failed topic exam.
pub const TOPIC_EXAM_FAILED_REASON: &str = "topic exam failed, must resubmit";
/// Block reason written by a failed thesis exam.
pub const THESIS_EXAM_FAILED_REASON: &str = "thesis exam failed";

/// Activity tags stamped into `last_activity_type`.
pub mod activity {
    pub const PROJECT_CREATED: &str = "project_created";
    pub const TOPIC_EXAM_RECORDED: &str = "topic_exam_recorded";
    pub const THESIS_EXAM_RECORDED: &str = "thesis_exam_recorded";
    pub const TOPIC_DEFENSE_RECORDED: &str = "topic_defense_request_recorded";
    pub const THESIS_DEFENSE_RECORDED: &str = "thesis_defense_request_recorded";
    pub const MEETING_PROGRESS_RECORDED: &str = "meeting_progress_recorded";
    pub const SYSTEM_TEST_RECORDED: &str = "system_test_recorded";
    pub const FINAL_DOCUMENT_RECORDED: &str = "final_document_recorded";
    pub const STEP_UPDATED: &str = "step_updated";
}

/// Identity of the parent project. Immutable once a state row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProjectId {
    fn from(id: i64) -> Self {
        ProjectId(id)
    }
}

/// Coarse lifecycle position of a student project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectPhase {
    #[default]
    Draft,
    PendingAdvisor,
    AdvisorAssigned,
    TopicSubmission,
    TopicExamPending,
    TopicExamScheduled,
    TopicFailed,
    InProgress,
    ThesisSubmission,
    ThesisExamPending,
    ThesisExamScheduled,
    ThesisFailed,
    Completed,
    Archived,
    Cancelled,
}

impl ProjectPhase {
    /// Every phase, in logical lifecycle order.
    pub const ALL: [ProjectPhase; 15] = [
        Self::Draft,
        Self::PendingAdvisor,
        Self::AdvisorAssigned,
        Self::TopicSubmission,
        Self::TopicExamPending,
        Self::TopicExamScheduled,
        Self::TopicFailed,
        Self::InProgress,
        Self::ThesisSubmission,
        Self::ThesisExamPending,
        Self::ThesisExamScheduled,
        Self::ThesisFailed,
        Self::Completed,
        Self::Archived,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingAdvisor => "PENDING_ADVISOR",
            Self::AdvisorAssigned => "ADVISOR_ASSIGNED",
            Self::TopicSubmission => "TOPIC_SUBMISSION",
            Self::TopicExamPending => "TOPIC_EXAM_PENDING",
            Self::TopicExamScheduled => "TOPIC_EXAM_SCHEDULED",
            Self::TopicFailed => "TOPIC_FAILED",
            Self::InProgress => "IN_PROGRESS",
            Self::ThesisSubmission => "THESIS_SUBMISSION",
            Self::ThesisExamPending => "THESIS_EXAM_PENDING",
            Self::ThesisExamScheduled => "THESIS_EXAM_SCHEDULED",
            Self::ThesisFailed => "THESIS_FAILED",
            Self::Completed => "COMPLETED",
            Self::Archived => "ARCHIVED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// No operation moves a project out of these phases, archiving a
    /// completed project aside.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Archived | Self::Cancelled)
    }

    pub fn can_submit_topic_defense(&self) -> bool {
        matches!(
            self,
            Self::AdvisorAssigned | Self::TopicSubmission | Self::TopicFailed
        )
    }

    pub fn can_submit_thesis_defense(&self) -> bool {
        matches!(self, Self::InProgress | Self::ThesisSubmission)
    }

    pub fn is_document_submission_phase(&self) -> bool {
        matches!(self, Self::TopicSubmission | Self::ThesisSubmission)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::Archived)
    }
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectPhase {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| ParseValueError::new("phase", s))
    }
}

/// Which of the two gating evaluations an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamType {
    Topic,
    Thesis,
}

impl ExamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "TOPIC",
            Self::Thesis => "THESIS",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TOPIC" => Ok(Self::Topic),
            "THESIS" => Ok(Self::Thesis),
            _ => Err(ParseValueError::new("exam type", s)),
        }
    }
}

/// Defense requests target the same two evaluations as exams.
pub type DefenseType = ExamType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamResult {
    Pending,
    Pass,
    Fail,
}

impl ExamResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for ExamResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamResult {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            _ => Err(ParseValueError::new("exam result", s)),
        }
    }
}

/// Status reported by the defense-request subsystem.
///
/// Only `submitted` and `scheduled` drive phase, matched case-insensitively
/// and ignoring surrounding whitespace; any other value is kept verbatim in
/// the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DefenseStatus {
    Submitted,
    Scheduled,
    Other(String),
}

impl DefenseStatus {
    pub const SUBMITTED: &'static str = "submitted";
    pub const SCHEDULED: &'static str = "scheduled";

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => Self::SUBMITTED,
            Self::Scheduled => Self::SCHEDULED,
            Self::Other(status) => status,
        }
    }
}

impl From<&str> for DefenseStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            Self::SUBMITTED => Self::Submitted,
            Self::SCHEDULED => Self::Scheduled,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl From<String> for DefenseStatus {
    fn from(s: String) -> Self {
        DefenseStatus::from(s.as_str())
    }
}

impl From<DefenseStatus> for String {
    fn from(status: DefenseStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for DefenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized lifecycle record, one per project.
///
/// Snapshot fields are read caches of other subsystems' tables and may be
/// stale; `current_phase` is the only field this component is authoritative
/// for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectWorkflowState {
    pub project_id: ProjectId,
    pub current_phase: ProjectPhase,
    pub current_step: Option<String>,

    pub project_status: Option<String>,
    pub topic_exam_result: Option<ExamResult>,
    pub topic_exam_date: Option<NaiveDate>,
    pub thesis_exam_result: Option<ExamResult>,
    pub thesis_exam_date: Option<NaiveDate>,
    pub topic_defense_request_id: Option<i64>,
    pub topic_defense_status: Option<DefenseStatus>,
    pub thesis_defense_request_id: Option<i64>,
    pub thesis_defense_status: Option<DefenseStatus>,
    pub system_test_request_id: Option<i64>,
    pub system_test_status: Option<String>,
    pub final_document_id: Option<i64>,
    pub final_document_status: Option<String>,

    pub meeting_count: u32,
    pub approved_meeting_count: u32,

    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub is_overdue: bool,

    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_activity_type: Option<String>,
    pub last_updated_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectWorkflowState {
    /// Fresh row with every snapshot and counter at its zero value.
    pub fn new(project_id: ProjectId, phase: ProjectPhase, now: DateTime<Utc>) -> Self {
        Self {
            project_id,
            current_phase: phase,
            current_step: None,
            project_status: None,
            topic_exam_result: None,
            topic_exam_date: None,
            thesis_exam_result: None,
            thesis_exam_date: None,
            topic_defense_request_id: None,
            topic_defense_status: None,
            thesis_defense_request_id: None,
            thesis_defense_status: None,
            system_test_request_id: None,
            system_test_status: None,
            final_document_id: None,
            final_document_status: None,
            meeting_count: 0,
            approved_meeting_count: 0,
            is_blocked: false,
            block_reason: None,
            is_overdue: false,
            last_activity_at: None,
            last_activity_type: None,
            last_updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn block(&mut self, reason: &str) {
        self.is_blocked = true;
        self.block_reason = Some(reason.to_string());
    }

    pub fn unblock(&mut self) {
        self.is_blocked = false;
        self.block_reason = None;
    }

    pub fn stamp_activity(&mut self, activity: &str, actor: Option<&str>, at: DateTime<Utc>) {
        self.last_activity_at = Some(at);
        self.last_activity_type = Some(activity.to_string());
        self.last_updated_by = actor.map(str::to_string);
        self.updated_at = at;
    }

    /// A project is actionable when it is neither blocked nor finished.
    pub fn is_actionable(&self) -> bool {
        !self.is_blocked && !self.current_phase.is_terminal()
    }

    pub fn can_submit_topic_defense(&self) -> bool {
        self.current_phase.can_submit_topic_defense()
    }

    pub fn can_submit_thesis_defense(&self) -> bool {
        self.current_phase.can_submit_thesis_defense()
    }

    pub fn is_document_submission_phase(&self) -> bool {
        self.current_phase.is_document_submission_phase()
    }

    pub fn is_complete(&self) -> bool {
        self.current_phase.is_complete()
    }

    pub fn derived_flags(&self) -> DerivedFlags {
        DerivedFlags {
            project_id: self.project_id,
            phase: self.current_phase,
            can_submit_topic_defense: self.can_submit_topic_defense(),
            can_submit_thesis_defense: self.can_submit_thesis_defense(),
            is_document_submission_phase: self.is_document_submission_phase(),
            is_complete: self.is_complete(),
            is_actionable: self.is_actionable(),
        }
    }
}

/// Read-only booleans computed from the phase, for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFlags {
    pub project_id: ProjectId,
    pub phase: ProjectPhase,
    pub can_submit_topic_defense: bool,
    pub can_submit_thesis_defense: bool,
    pub is_document_submission_phase: bool,
    pub is_complete: bool,
    pub is_actionable: bool,
}

/// Dashboard listing filter. Empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFilter {
    pub phase: Option<ProjectPhase>,
    #[serde(default)]
    pub blocked_only: bool,
    #[serde(default)]
    pub overdue_only: bool,
}

impl StateFilter {
    pub fn matches(&self, state: &ProjectWorkflowState) -> bool {
        self.phase.map_or(true, |phase| state.current_phase == phase)
            && (!self.blocked_only || state.is_blocked)
            && (!self.overdue_only || state.is_overdue)
    }
}
