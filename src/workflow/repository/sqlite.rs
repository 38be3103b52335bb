//! SQLite implementation of `WorkflowStateRepository`.
//!
//! Rows live in `project_workflow_states` (see `migrations/`). Timestamps are
//! stored as RFC 3339 text and exam dates as `YYYY-MM-DD`.
//!
//! # Row locking
//!
//! SQLite has no `SELECT ... FOR UPDATE`. `update` opens a transaction whose
//! first statement is a no-op write on the target row, which takes the
//! database write lock before the row is read. A concurrent `update` blocks
//! on the busy timeout until the first commits, then reads the committed
//! row. Dropping the transaction on any error path rolls it back.
//!
//! `projects.status` is read on the same transaction after the claim, so the
//! snapshot written back is never older than one a later update stored.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::debug;

use super::{StateMutation, StatusResync, WorkflowStateRepository};
use crate::workflow::errors::{ParseValueError, UpstreamError, WorkflowError};
use crate::workflow::types::{DefenseStatus, ProjectId, ProjectWorkflowState, StateFilter};
use crate::workflow::upstream::usable_status;

const INSERT_STATE: &str = r#"
    INSERT INTO project_workflow_states (
        project_id, current_phase, current_step, project_status,
        topic_exam_result, topic_exam_date, thesis_exam_result, thesis_exam_date,
        topic_defense_request_id, topic_defense_status,
        thesis_defense_request_id, thesis_defense_status,
        system_test_request_id, system_test_status,
        final_document_id, final_document_status,
        meeting_count, approved_meeting_count,
        is_blocked, block_reason, is_overdue,
        last_activity_at, last_activity_type, last_updated_by,
        created_at, updated_at
    ) VALUES (
        ?1, ?2, ?3,
        COALESCE(
            (SELECT CASE WHEN TRIM(status) <> '' THEN status END FROM projects WHERE id = ?1),
            ?4
        ),
        ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
        ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
    )
    ON CONFLICT(project_id) DO NOTHING
    RETURNING project_status
"#;

const UPDATE_STATE: &str = r#"
    UPDATE project_workflow_states SET
        current_phase = ?2,
        current_step = ?3,
        project_status = ?4,
        topic_exam_result = ?5,
        topic_exam_date = ?6,
        thesis_exam_result = ?7,
        thesis_exam_date = ?8,
        topic_defense_request_id = ?9,
        topic_defense_status = ?10,
        thesis_defense_request_id = ?11,
        thesis_defense_status = ?12,
        system_test_request_id = ?13,
        system_test_status = ?14,
        final_document_id = ?15,
        final_document_status = ?16,
        meeting_count = ?17,
        approved_meeting_count = ?18,
        is_blocked = ?19,
        block_reason = ?20,
        is_overdue = ?21,
        last_activity_at = ?22,
        last_activity_type = ?23,
        last_updated_by = ?24,
        created_at = ?25,
        updated_at = ?26
    WHERE project_id = ?1
"#;

const CLAIM_ROW: &str =
    "UPDATE project_workflow_states SET project_id = project_id WHERE project_id = ?1";

const SELECT_PROJECT_STATUS: &str = "SELECT status FROM projects WHERE id = ?1";

const SELECT_STATE: &str = "SELECT * FROM project_workflow_states WHERE project_id = ?1";

const LIST_STATES: &str = r#"
    SELECT * FROM project_workflow_states
    WHERE (?1 IS NULL OR current_phase = ?1)
      AND (?2 = 0 OR is_blocked = 1)
      AND (?3 = 0 OR is_overdue = 1)
    ORDER BY project_id ASC
"#;

/// SQLite-backed workflow state repository.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStateRepository for SqliteRepository {
    async fn insert(
        &self,
        mut state: ProjectWorkflowState,
    ) -> Result<ProjectWorkflowState, WorkflowError> {
        let inserted = bind_state(sqlx::query(INSERT_STATE), &state)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = inserted else {
            return Err(WorkflowError::DuplicateState {
                project_id: state.project_id,
            });
        };
        state.project_status = row.try_get("project_status")?;
        Ok(state)
    }

    async fn get(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let row = sqlx::query(SELECT_STATE)
            .bind(project_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(state_from_row).transpose()
    }

    async fn update(
        &self,
        project_id: ProjectId,
        resync: StatusResync,
        mutation: StateMutation,
    ) -> Result<Option<ProjectWorkflowState>, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(CLAIM_ROW)
            .bind(project_id.0)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            debug!(project_id = %project_id, "No workflow state row to update");
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(SELECT_STATE)
            .bind(project_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let mut state = state_from_row(&row)?;

        if resync == StatusResync::Refresh {
            let read = sqlx::query_scalar::<_, Option<String>>(SELECT_PROJECT_STATUS)
                .bind(project_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map(Option::flatten)
                .map_err(UpstreamError::from);
            if let Some(status) = usable_status(project_id, read) {
                state.project_status = Some(status);
            }
        }

        mutation(&mut state)?;

        bind_state(sqlx::query(UPDATE_STATE), &state)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(state))
    }

    async fn list(&self, filter: &StateFilter) -> Result<Vec<ProjectWorkflowState>, WorkflowError> {
        let rows = sqlx::query(LIST_STATES)
            .bind(filter.phase.map(|phase| phase.as_str()))
            .bind(filter.blocked_only)
            .bind(filter.overdue_only)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(state_from_row).collect()
    }
}

/// Bind every column in `?1..?26` order shared by insert and update.
fn bind_state<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    state: &ProjectWorkflowState,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(state.project_id.0)
        .bind(state.current_phase.as_str())
        .bind(state.current_step.clone())
        .bind(state.project_status.clone())
        .bind(state.topic_exam_result.map(|r| r.as_str()))
        .bind(state.topic_exam_date.map(|d| d.to_string()))
        .bind(state.thesis_exam_result.map(|r| r.as_str()))
        .bind(state.thesis_exam_date.map(|d| d.to_string()))
        .bind(state.topic_defense_request_id)
        .bind(state.topic_defense_status.as_ref().map(|s| s.as_str().to_string()))
        .bind(state.thesis_defense_request_id)
        .bind(state.thesis_defense_status.as_ref().map(|s| s.as_str().to_string()))
        .bind(state.system_test_request_id)
        .bind(state.system_test_status.clone())
        .bind(state.final_document_id)
        .bind(state.final_document_status.clone())
        .bind(i64::from(state.meeting_count))
        .bind(i64::from(state.approved_meeting_count))
        .bind(state.is_blocked)
        .bind(state.block_reason.clone())
        .bind(state.is_overdue)
        .bind(state.last_activity_at.map(|at| at.to_rfc3339()))
        .bind(state.last_activity_type.clone())
        .bind(state.last_updated_by.clone())
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
}

fn state_from_row(row: &SqliteRow) -> Result<ProjectWorkflowState, WorkflowError> {
    let project_id = ProjectId(row.try_get("project_id")?);
    let corrupt = |reason: String| WorkflowError::CorruptRow { project_id, reason };

    let phase: String = row.try_get("current_phase")?;
    let meeting_count: i64 = row.try_get("meeting_count")?;
    let approved_meeting_count: i64 = row.try_get("approved_meeting_count")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ProjectWorkflowState {
        project_id,
        current_phase: phase.parse().map_err(|e: ParseValueError| corrupt(e.to_string()))?,
        current_step: row.try_get("current_step")?,
        project_status: row.try_get("project_status")?,
        topic_exam_result: parse_optional(row.try_get("topic_exam_result")?)
            .map_err(|e| corrupt(e.to_string()))?,
        topic_exam_date: parse_date(row.try_get("topic_exam_date")?).map_err(&corrupt)?,
        thesis_exam_result: parse_optional(row.try_get("thesis_exam_result")?)
            .map_err(|e| corrupt(e.to_string()))?,
        thesis_exam_date: parse_date(row.try_get("thesis_exam_date")?).map_err(&corrupt)?,
        topic_defense_request_id: row.try_get("topic_defense_request_id")?,
        topic_defense_status: row
            .try_get::<Option<String>, _>("topic_defense_status")?
            .map(DefenseStatus::from),
        thesis_defense_request_id: row.try_get("thesis_defense_request_id")?,
        thesis_defense_status: row
            .try_get::<Option<String>, _>("thesis_defense_status")?
            .map(DefenseStatus::from),
        system_test_request_id: row.try_get("system_test_request_id")?,
        system_test_status: row.try_get("system_test_status")?,
        final_document_id: row.try_get("final_document_id")?,
        final_document_status: row.try_get("final_document_status")?,
        meeting_count: u32::try_from(meeting_count)
            .map_err(|_| corrupt(format!("meeting_count out of range: {meeting_count}")))?,
        approved_meeting_count: u32::try_from(approved_meeting_count).map_err(|_| {
            corrupt(format!(
                "approved_meeting_count out of range: {approved_meeting_count}"
            ))
        })?,
        is_blocked: row.try_get("is_blocked")?,
        block_reason: row.try_get("block_reason")?,
        is_overdue: row.try_get("is_overdue")?,
        last_activity_at: row
            .try_get::<Option<String>, _>("last_activity_at")?
            .map(|raw| parse_timestamp(&raw))
            .transpose()
            .map_err(&corrupt)?,
        last_activity_type: row.try_get("last_activity_type")?,
        last_updated_by: row.try_get("last_updated_by")?,
        created_at: parse_timestamp(&created_at).map_err(&corrupt)?,
        updated_at: parse_timestamp(&updated_at).map_err(&corrupt)?,
    })
}

fn parse_optional<T>(raw: Option<String>) -> Result<Option<T>, ParseValueError>
where
    T: FromStr<Err = ParseValueError>,
{
    raw.map(|value| value.parse()).transpose()
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>, String> {
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map_err(|e| format!("bad date '{value}': {e}"))
    })
    .transpose()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{raw}': {e}"))
}
