//! Explicit phase transition table.
//!
//! Every phase move the store can make is listed in [`DEFAULT_RULES`] as
//! `(event, source phases, target phase)`. The table is validated when it is
//! built, so a contradictory or unreachable rule set fails at construction
//! rather than at the first event that hits it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use super::errors::{ParseValueError, WorkflowError};
use super::types::{
    DefenseStatus, DefenseType, ExamResult, ExamType, ProjectId, ProjectPhase,
    THESIS_EXAM_FAILED_REASON, TOPIC_EXAM_FAILED_REASON,
};

use ProjectPhase as P;

/// Facts that can move `current_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    TopicDefenseSubmitted,
    TopicDefenseScheduled,
    ThesisDefenseSubmitted,
    ThesisDefenseScheduled,
    TopicExamPassed,
    TopicExamFailed,
    ThesisExamPassed,
    ThesisExamFailed,
    AdvisorRequested,
    AdvisorAssigned,
    TopicSubmissionOpened,
    ThesisSubmissionOpened,
    Archived,
    Cancelled,
}

/// What an event does to the blocked flag once its phase move is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEffect {
    Block(&'static str),
    Clear,
    Keep,
}

impl PhaseEvent {
    pub const ALL: [PhaseEvent; 14] = [
        Self::TopicDefenseSubmitted,
        Self::TopicDefenseScheduled,
        Self::ThesisDefenseSubmitted,
        Self::ThesisDefenseScheduled,
        Self::TopicExamPassed,
        Self::TopicExamFailed,
        Self::ThesisExamPassed,
        Self::ThesisExamFailed,
        Self::AdvisorRequested,
        Self::AdvisorAssigned,
        Self::TopicSubmissionOpened,
        Self::ThesisSubmissionOpened,
        Self::Archived,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicDefenseSubmitted => "topic_defense_submitted",
            Self::TopicDefenseScheduled => "topic_defense_scheduled",
            Self::ThesisDefenseSubmitted => "thesis_defense_submitted",
            Self::ThesisDefenseScheduled => "thesis_defense_scheduled",
            Self::TopicExamPassed => "topic_exam_passed",
            Self::TopicExamFailed => "topic_exam_failed",
            Self::ThesisExamPassed => "thesis_exam_passed",
            Self::ThesisExamFailed => "thesis_exam_failed",
            Self::AdvisorRequested => "advisor_requested",
            Self::AdvisorAssigned => "advisor_assigned",
            Self::TopicSubmissionOpened => "topic_submission_opened",
            Self::ThesisSubmissionOpened => "thesis_submission_opened",
            Self::Archived => "archived",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn block_effect(&self) -> BlockEffect {
        match self {
            Self::TopicExamFailed => BlockEffect::Block(TOPIC_EXAM_FAILED_REASON),
            Self::ThesisExamFailed => BlockEffect::Block(THESIS_EXAM_FAILED_REASON),
            Self::TopicExamPassed | Self::ThesisExamPassed => BlockEffect::Clear,
            _ => BlockEffect::Keep,
        }
    }

    /// Phase event for an exam result. `PENDING` never moves phase.
    pub fn for_exam(exam_type: ExamType, result: ExamResult) -> Option<Self> {
        match (exam_type, result) {
            (_, ExamResult::Pending) => None,
            (ExamType::Topic, ExamResult::Pass) => Some(Self::TopicExamPassed),
            (ExamType::Topic, ExamResult::Fail) => Some(Self::TopicExamFailed),
            (ExamType::Thesis, ExamResult::Pass) => Some(Self::ThesisExamPassed),
            (ExamType::Thesis, ExamResult::Fail) => Some(Self::ThesisExamFailed),
        }
    }

    /// Phase event for a defense-request status. Freeform statuses never
    /// move phase.
    pub fn for_defense(defense_type: DefenseType, status: &DefenseStatus) -> Option<Self> {
        match (defense_type, status) {
            (_, DefenseStatus::Other(_)) => None,
            (ExamType::Topic, DefenseStatus::Submitted) => Some(Self::TopicDefenseSubmitted),
            (ExamType::Topic, DefenseStatus::Scheduled) => Some(Self::TopicDefenseScheduled),
            (ExamType::Thesis, DefenseStatus::Submitted) => Some(Self::ThesisDefenseSubmitted),
            (ExamType::Thesis, DefenseStatus::Scheduled) => Some(Self::ThesisDefenseScheduled),
        }
    }
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory and administrative events applied directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    AdvisorRequested,
    AdvisorAssigned,
    TopicSubmissionOpened,
    ThesisSubmissionOpened,
    Archived,
    Cancelled,
}

impl LifecycleEvent {
    pub fn phase_event(&self) -> PhaseEvent {
        match self {
            Self::AdvisorRequested => PhaseEvent::AdvisorRequested,
            Self::AdvisorAssigned => PhaseEvent::AdvisorAssigned,
            Self::TopicSubmissionOpened => PhaseEvent::TopicSubmissionOpened,
            Self::ThesisSubmissionOpened => PhaseEvent::ThesisSubmissionOpened,
            Self::Archived => PhaseEvent::Archived,
            Self::Cancelled => PhaseEvent::Cancelled,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase_event().as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "advisor_requested" => Ok(Self::AdvisorRequested),
            "advisor_assigned" => Ok(Self::AdvisorAssigned),
            "topic_submission_opened" => Ok(Self::TopicSubmissionOpened),
            "thesis_submission_opened" => Ok(Self::ThesisSubmissionOpened),
            "archived" => Ok(Self::Archived),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseValueError::new("lifecycle event", s)),
        }
    }
}

/// Phases a rule applies from.
#[derive(Debug, Clone, Copy)]
pub enum Sources {
    /// Every non-terminal phase.
    AnyActive,
    Only(&'static [ProjectPhase]),
}

impl Sources {
    fn phases(&self) -> Vec<ProjectPhase> {
        match self {
            Sources::AnyActive => ProjectPhase::ALL
                .into_iter()
                .filter(|phase| !phase.is_terminal())
                .collect(),
            Sources::Only(phases) => phases.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub event: PhaseEvent,
    pub from: Sources,
    pub to: ProjectPhase,
}

const fn rule(event: PhaseEvent, from: Sources, to: ProjectPhase) -> TransitionRule {
    TransitionRule { event, from, to }
}

pub const DEFAULT_RULES: &[TransitionRule] = &[
    // Defense requests and exam results apply from any active phase, which
    // is what lets a failed project resubmit.
    rule(PhaseEvent::TopicDefenseSubmitted, Sources::AnyActive, P::TopicExamPending),
    rule(PhaseEvent::TopicDefenseScheduled, Sources::AnyActive, P::TopicExamScheduled),
    rule(PhaseEvent::ThesisDefenseSubmitted, Sources::AnyActive, P::ThesisExamPending),
    rule(PhaseEvent::ThesisDefenseScheduled, Sources::AnyActive, P::ThesisExamScheduled),
    rule(PhaseEvent::TopicExamPassed, Sources::AnyActive, P::InProgress),
    rule(PhaseEvent::TopicExamFailed, Sources::AnyActive, P::TopicFailed),
    rule(PhaseEvent::ThesisExamPassed, Sources::AnyActive, P::Completed),
    rule(PhaseEvent::ThesisExamFailed, Sources::AnyActive, P::ThesisFailed),
    rule(PhaseEvent::AdvisorRequested, Sources::Only(&[P::Draft]), P::PendingAdvisor),
    rule(
        PhaseEvent::AdvisorAssigned,
        Sources::Only(&[P::Draft, P::PendingAdvisor]),
        P::AdvisorAssigned,
    ),
    rule(
        PhaseEvent::TopicSubmissionOpened,
        Sources::Only(&[P::AdvisorAssigned, P::TopicFailed]),
        P::TopicSubmission,
    ),
    rule(
        PhaseEvent::ThesisSubmissionOpened,
        Sources::Only(&[P::InProgress, P::ThesisFailed]),
        P::ThesisSubmission,
    ),
    rule(PhaseEvent::Archived, Sources::Only(&[P::Completed]), P::Archived),
    rule(PhaseEvent::Cancelled, Sources::AnyActive, P::Cancelled),
];

/// Validated `(from-phase, event) -> to-phase` lookup.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: HashMap<(ProjectPhase, PhaseEvent), ProjectPhase>,
    targets: HashMap<PhaseEvent, ProjectPhase>,
}

impl TransitionTable {
    pub fn new() -> Result<Self, WorkflowError> {
        Self::from_rules(DEFAULT_RULES)
    }

    pub fn from_rules(rules: &[TransitionRule]) -> Result<Self, WorkflowError> {
        let mut edges = HashMap::new();
        let mut targets: HashMap<PhaseEvent, ProjectPhase> = HashMap::new();

        for rule in rules {
            match targets.get(&rule.event) {
                Some(existing) if *existing != rule.to => {
                    return Err(invalid(format!(
                        "event {} targets both {} and {}",
                        rule.event, existing, rule.to
                    )));
                }
                _ => {
                    targets.insert(rule.event, rule.to);
                }
            }

            for from in rule.from.phases() {
                if from.is_terminal() && !(from == P::Completed && rule.to == P::Archived) {
                    return Err(invalid(format!(
                        "rule {} leaves terminal phase {}",
                        rule.event, from
                    )));
                }
                if edges.insert((from, rule.event), rule.to).is_some() {
                    return Err(invalid(format!(
                        "duplicate rule for {} on {}",
                        from, rule.event
                    )));
                }
            }
        }

        let table = Self { edges, targets };

        if let Some(event) = PhaseEvent::ALL
            .into_iter()
            .find(|event| !table.targets.contains_key(event))
        {
            return Err(invalid(format!("event {} has no rule", event)));
        }

        let reachable = table.reachable_from(P::Draft);
        let unreachable: Vec<&str> = ProjectPhase::ALL
            .iter()
            .filter(|phase| !reachable.contains(phase))
            .map(|phase| phase.as_str())
            .collect();
        if !unreachable.is_empty() {
            return Err(invalid(format!(
                "phases unreachable from DRAFT: {}",
                unreachable.join(", ")
            )));
        }

        Ok(table)
    }

    pub fn next(&self, from: ProjectPhase, event: PhaseEvent) -> Option<ProjectPhase> {
        self.edges.get(&(from, event)).copied()
    }

    pub fn target_of(&self, event: PhaseEvent) -> Option<ProjectPhase> {
        self.targets.get(&event).copied()
    }

    /// Resolve the phase a project lands in.
    ///
    /// A terminal row accepts an event whose target is the phase it already
    /// holds (a replayed completion) and rejects anything that would move it.
    pub fn resolve(
        &self,
        project_id: ProjectId,
        from: ProjectPhase,
        event: PhaseEvent,
    ) -> Result<ProjectPhase, WorkflowError> {
        if let Some(to) = self.next(from, event) {
            return Ok(to);
        }

        match self.target_of(event) {
            Some(target) if from.is_terminal() && target == from => Ok(from),
            Some(target) if from.is_terminal() => Err(WorkflowError::TerminalPhase {
                project_id,
                phase: from,
                event,
                target,
            }),
            _ => Err(WorkflowError::InvalidTransition {
                project_id,
                from,
                event,
            }),
        }
    }

    pub fn reachable_from(&self, start: ProjectPhase) -> HashSet<ProjectPhase> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(phase) = queue.pop_front() {
            for ((from, _), to) in &self.edges {
                if *from == phase && seen.insert(*to) {
                    queue.push_back(*to);
                }
            }
        }

        seen
    }
}

fn invalid(reason: String) -> WorkflowError {
    WorkflowError::InvalidTransitionTable { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = TransitionTable::new().unwrap();
        assert_eq!(table.reachable_from(P::Draft).len(), ProjectPhase::ALL.len());
    }

    #[test]
    fn test_exam_and_defense_events_apply_from_every_active_phase() {
        let table = TransitionTable::new().unwrap();
        let expectations = [
            (PhaseEvent::TopicDefenseSubmitted, P::TopicExamPending),
            (PhaseEvent::TopicDefenseScheduled, P::TopicExamScheduled),
            (PhaseEvent::ThesisDefenseSubmitted, P::ThesisExamPending),
            (PhaseEvent::ThesisDefenseScheduled, P::ThesisExamScheduled),
            (PhaseEvent::TopicExamPassed, P::InProgress),
            (PhaseEvent::TopicExamFailed, P::TopicFailed),
            (PhaseEvent::ThesisExamPassed, P::Completed),
            (PhaseEvent::ThesisExamFailed, P::ThesisFailed),
        ];

        for phase in ProjectPhase::ALL.into_iter().filter(|p| !p.is_terminal()) {
            for (event, target) in expectations {
                assert_eq!(table.next(phase, event), Some(target), "{phase} on {event}");
            }
        }
    }

    #[test]
    fn test_terminal_phases_only_archive() {
        let table = TransitionTable::new().unwrap();
        for phase in [P::Completed, P::Archived, P::Cancelled] {
            for event in PhaseEvent::ALL {
                let next = table.next(phase, event);
                if phase == P::Completed && event == PhaseEvent::Archived {
                    assert_eq!(next, Some(P::Archived));
                } else {
                    assert_eq!(next, None, "{phase} on {event}");
                }
            }
        }
    }

    #[test]
    fn test_resolve_terminal_replay_and_rejection() {
        let table = TransitionTable::new().unwrap();
        let id = ProjectId(9);

        assert_eq!(
            table.resolve(id, P::Completed, PhaseEvent::ThesisExamPassed).unwrap(),
            P::Completed
        );
        assert!(matches!(
            table.resolve(id, P::Completed, PhaseEvent::ThesisDefenseSubmitted),
            Err(WorkflowError::TerminalPhase { target: P::ThesisExamPending, .. })
        ));
        assert!(matches!(
            table.resolve(id, P::InProgress, PhaseEvent::AdvisorRequested),
            Err(WorkflowError::InvalidTransition { from: P::InProgress, .. })
        ));
    }

    #[test]
    fn test_conflicting_targets_rejected() {
        let rules = [
            rule(PhaseEvent::AdvisorRequested, Sources::Only(&[P::Draft]), P::PendingAdvisor),
            rule(PhaseEvent::AdvisorRequested, Sources::Only(&[P::TopicFailed]), P::Draft),
        ];
        let err = TransitionTable::from_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("targets both"));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut rules = DEFAULT_RULES.to_vec();
        rules.push(rule(PhaseEvent::AdvisorRequested, Sources::Only(&[P::Draft]), P::PendingAdvisor));
        let err = TransitionTable::from_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("duplicate rule"));
    }

    #[test]
    fn test_edge_out_of_terminal_rejected() {
        let mut rules = DEFAULT_RULES.to_vec();
        rules.retain(|r| r.event != PhaseEvent::AdvisorRequested);
        rules.push(rule(
            PhaseEvent::AdvisorRequested,
            Sources::Only(&[P::Draft, P::Cancelled]),
            P::PendingAdvisor,
        ));
        let err = TransitionTable::from_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("leaves terminal phase CANCELLED"));
    }

    #[test]
    fn test_unreachable_phase_rejected() {
        let mut rules: Vec<_> = DEFAULT_RULES
            .iter()
            .copied()
            .filter(|r| r.event != PhaseEvent::AdvisorRequested)
            .collect();
        rules.push(rule(
            PhaseEvent::AdvisorRequested,
            Sources::Only(&[P::PendingAdvisor]),
            P::PendingAdvisor,
        ));
        let err = TransitionTable::from_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("unreachable from DRAFT: PENDING_ADVISOR"));
    }

    #[test]
    fn test_event_without_rule_rejected() {
        let rules: Vec<_> = DEFAULT_RULES
            .iter()
            .copied()
            .filter(|r| r.event != PhaseEvent::Cancelled)
            .collect();
        let err = TransitionTable::from_rules(&rules).unwrap_err();
        assert!(err.to_string().contains("cancelled has no rule"));
    }

    #[test]
    fn test_pending_and_freeform_never_map_to_events() {
        assert_eq!(PhaseEvent::for_exam(ExamType::Topic, ExamResult::Pending), None);
        assert_eq!(PhaseEvent::for_exam(ExamType::Thesis, ExamResult::Pending), None);
        assert_eq!(
            PhaseEvent::for_defense(ExamType::Thesis, &DefenseStatus::Other("rejected".into())),
            None
        );
        assert_eq!(
            PhaseEvent::for_defense(ExamType::Thesis, &DefenseStatus::Submitted),
            Some(PhaseEvent::ThesisDefenseSubmitted)
        );
    }

    #[test]
    fn test_lifecycle_event_parsing() {
        assert_eq!(
            "advisor-assigned".parse::<LifecycleEvent>().unwrap(),
            LifecycleEvent::AdvisorAssigned
        );
        assert!("graduated".parse::<LifecycleEvent>().is_err());
    }
}
