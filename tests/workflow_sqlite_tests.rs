//! SQLite-backed workflow store tests
//!
//! Each test opens a fresh database file in a temp directory with migrations
//! applied, so the foreign key cascade and row-claiming transactions run
//! against real SQLite.

#![cfg(feature = "database")]

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tempfile::TempDir;

use capstone_tracker::workflow::{SqliteRepository, StatusResync, WorkflowStateRepository};
use capstone_tracker::{
    DatabaseManager, DefenseStatus, ExamResult, ExamType, LifecycleEvent, ProjectId,
    ProjectPhase, StateFilter, WorkflowError, WorkflowPolicy, WorkflowStateStore,
};

async fn open_database(temp_dir: &TempDir) -> Result<DatabaseManager> {
    DatabaseManager::open(temp_dir.path().join("db/capstone.db"), 5, true).await
}

async fn store_with_project(
    temp_dir: &TempDir,
    project_id: ProjectId,
    status: Option<&str>,
) -> Result<(DatabaseManager, WorkflowStateStore)> {
    let db = open_database(temp_dir).await?;
    db.insert_project(project_id, "Thesis tracker", status).await?;
    let store = db.workflow_store(WorkflowPolicy::default())?;
    Ok((db, store))
}

fn date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[tokio::test]
async fn test_resubmission_scenario_persists() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(42);
    let (db, store) = store_with_project(&temp_dir, id, Some("active")).await?;

    let state = store.initialize(id, Some("registrar")).await?;
    assert_eq!(state.current_phase, ProjectPhase::Draft);
    assert_eq!(state.project_status.as_deref(), Some("active"));

    store
        .record_defense_request(id, ExamType::Topic, 7, DefenseStatus::Submitted, None)
        .await?;
    let state = store
        .record_exam_result(id, ExamType::Topic, ExamResult::Fail, date("2025-01-10"), None)
        .await?
        .expect("row exists");
    assert_eq!(state.current_phase, ProjectPhase::TopicFailed);
    assert!(state.is_blocked);

    store
        .record_defense_request(id, ExamType::Topic, 8, DefenseStatus::Submitted, None)
        .await?;
    store
        .record_exam_result(id, ExamType::Topic, ExamResult::Pass, date("2025-02-01"), Some("advisor-3"))
        .await?;

    let stored = store.get(id).await?.expect("row exists");
    assert_eq!(stored.current_phase, ProjectPhase::InProgress);
    assert!(!stored.is_blocked);
    assert!(stored.block_reason.is_none());
    assert_eq!(stored.topic_defense_request_id, Some(8));
    assert_eq!(stored.topic_defense_status, Some(DefenseStatus::Submitted));
    assert_eq!(stored.topic_exam_result, Some(ExamResult::Pass));
    assert_eq!(stored.topic_exam_date, date("2025-02-01"));
    assert_eq!(stored.last_updated_by.as_deref(), Some("advisor-3"));

    db.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_initialize_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (_db, store) = store_with_project(&temp_dir, ProjectId(1), None).await?;

    store.initialize(ProjectId(1), None).await?;
    let err = store.initialize(ProjectId(1), None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateState { .. }));
    Ok(())
}

#[tokio::test]
async fn test_initialize_requires_project_row() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = open_database(&temp_dir).await?;
    let store = db.workflow_store(WorkflowPolicy::default())?;

    let err = store.initialize(ProjectId(404), None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Database(_)));
    Ok(())
}

#[tokio::test]
async fn test_project_delete_cascades() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(2);
    let (db, store) = store_with_project(&temp_dir, id, None).await?;
    store.initialize(id, None).await?;

    assert!(db.delete_project(id).await?);
    assert!(!store.exists(id).await?);

    let result = store
        .record_meeting_progress(id, 3, 2, None)
        .await?;
    assert!(result.is_none());

    let strict = db.workflow_store(WorkflowPolicy {
        strict_missing_state: true,
    })?;
    let err = strict.record_meeting_progress(id, 3, 2, None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::MissingState { .. }));
    Ok(())
}

#[tokio::test]
async fn test_project_status_resyncs_on_mutation() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(3);
    let (db, store) = store_with_project(&temp_dir, id, None).await?;

    let state = store.initialize(id, None).await?;
    assert!(state.project_status.is_none());

    db.set_project_status(id, "active").await?;
    // Changing the project row alone does not touch the snapshot.
    assert!(store.get(id).await?.expect("row").project_status.is_none());

    let state = store.update_step(id, Some("proposal".into()), None).await?.expect("row");
    assert_eq!(state.project_status.as_deref(), Some("active"));

    db.set_project_status(id, "").await?;
    let state = store.record_meeting_progress(id, 1, 1, None).await?.expect("row");
    assert_eq!(state.project_status.as_deref(), Some("active"));

    db.set_project_status(id, "suspended").await?;
    let state = store.mark_overdue(id, true).await?.expect("row");
    // The overdue path is not activity and does not resync.
    assert_eq!(state.project_status.as_deref(), Some("active"));
    assert!(state.is_overdue);
    Ok(())
}

#[tokio::test]
async fn test_status_read_inside_row_transaction() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(8);
    let (db, _store) = store_with_project(&temp_dir, id, Some("   ")).await?;
    let repository = SqliteRepository::new(db.pool().clone());

    let state = repository
        .insert(capstone_tracker::ProjectWorkflowState::new(
            id,
            ProjectPhase::Draft,
            chrono::Utc::now(),
        ))
        .await?;
    assert!(state.project_status.is_none());

    db.set_project_status(id, "active").await?;
    let kept = repository
        .update(id, StatusResync::Keep, Box::new(|_| Ok(())))
        .await?
        .expect("row");
    assert!(kept.project_status.is_none());

    let refreshed = repository
        .update(
            id,
            StatusResync::Refresh,
            Box::new(|state| {
                // The mutation already sees the status read under the claim.
                assert_eq!(state.project_status.as_deref(), Some("active"));
                Ok(())
            }),
        )
        .await?
        .expect("row");
    assert_eq!(refreshed.project_status.as_deref(), Some("active"));
    assert_eq!(
        repository.get(id).await?.expect("row").project_status.as_deref(),
        Some("active")
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_updates_do_not_lose_writes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(4);
    let (db, store) = store_with_project(&temp_dir, id, None).await?;
    store.initialize(id, None).await?;

    let repository = Arc::new(SqliteRepository::new(db.pool().clone()));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let repository = Arc::clone(&repository);
            tokio::spawn(async move {
                repository
                    .update(
                        id,
                        StatusResync::Refresh,
                        Box::new(|state| {
                            state.meeting_count += 1;
                            Ok(())
                        }),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }

    let stored = repository.get(id).await?.expect("row");
    assert_eq!(stored.meeting_count, 16);
    Ok(())
}

#[tokio::test]
async fn test_rejected_event_rolls_back() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(5);
    let (_db, store) = store_with_project(&temp_dir, id, None).await?;
    store.initialize(id, None).await?;
    store
        .apply_lifecycle_event(id, LifecycleEvent::Cancelled, None)
        .await?;
    let before = store.get(id).await?.expect("row");

    let err = store
        .record_exam_result(id, ExamType::Thesis, ExamResult::Pass, date("2025-05-05"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TerminalPhase { .. }));

    let after = store.get(id).await?.expect("row");
    assert_eq!(after, before);
    assert!(after.thesis_exam_result.is_none());

    // Non-phase events are still accepted on a terminal row.
    let state = store
        .record_final_document(id, 90, "withdrawn", None)
        .await?
        .expect("row");
    assert_eq!(state.current_phase, ProjectPhase::Cancelled);
    assert_eq!(state.final_document_status.as_deref(), Some("withdrawn"));
    Ok(())
}

#[tokio::test]
async fn test_state_survives_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(6);
    {
        let (db, store) = store_with_project(&temp_dir, id, Some("active")).await?;
        store.initialize(id, None).await?;
        store
            .record_defense_request(id, ExamType::Thesis, 14, "under review".into(), None)
            .await?;
        store.record_system_test(id, 15, "passed", None).await?;
        db.shutdown().await;
    }

    let db = open_database(&temp_dir).await?;
    let store = db.workflow_store(WorkflowPolicy::default())?;
    let state = store.get(id).await?.expect("row survives reopen");
    assert_eq!(state.current_phase, ProjectPhase::Draft);
    assert_eq!(
        state.thesis_defense_status,
        Some(DefenseStatus::Other("under review".to_string()))
    );
    assert_eq!(state.system_test_request_id, Some(15));
    assert_eq!(state.system_test_status.as_deref(), Some("passed"));
    assert_eq!(state.project_status.as_deref(), Some("active"));
    Ok(())
}

#[tokio::test]
async fn test_list_filters() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = open_database(&temp_dir).await?;
    let store = db.workflow_store(WorkflowPolicy::default())?;

    for id in [30, 10, 20] {
        db.insert_project(ProjectId(id), "p", None).await?;
        store.initialize(ProjectId(id), None).await?;
    }
    store
        .record_exam_result(ProjectId(20), ExamType::Topic, ExamResult::Fail, None, None)
        .await?;
    store.mark_overdue(ProjectId(30), true).await?;

    let all: Vec<i64> = store
        .list(&StateFilter::default())
        .await?
        .iter()
        .map(|s| s.project_id.0)
        .collect();
    assert_eq!(all, vec![10, 20, 30]);

    let blocked = store
        .list(&StateFilter {
            blocked_only: true,
            ..Default::default()
        })
        .await?;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].current_phase, ProjectPhase::TopicFailed);

    let overdue_drafts = store
        .list(&StateFilter {
            phase: Some(ProjectPhase::Draft),
            blocked_only: false,
            overdue_only: true,
        })
        .await?;
    assert_eq!(overdue_drafts.len(), 1);
    assert_eq!(overdue_drafts[0].project_id, ProjectId(30));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_row_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = ProjectId(7);
    let (db, store) = store_with_project(&temp_dir, id, None).await?;
    store.initialize(id, None).await?;

    sqlx::query("UPDATE project_workflow_states SET topic_exam_date = 'soon' WHERE project_id = ?1")
        .bind(id.0)
        .execute(db.pool())
        .await?;

    let err = store.get(id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::CorruptRow { project_id, .. } if project_id == id));
    Ok(())
}
