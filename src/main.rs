use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Instrument;

use capstone_tracker::telemetry::{
    create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
    OperationTimer,
};
use capstone_tracker::{
    CapstoneTrackerConfig, DatabaseManager, DefenseStatus, ExamResult, ExamType,
    LifecycleEvent, ProjectId, ProjectPhase, ProjectWorkflowState, StateFilter,
    WorkflowStateStore,
};

#[derive(Parser)]
#[command(name = "capstone-tracker")]
#[command(about = "Track the workflow phase of student capstone projects")]
#[command(long_about = "Keeps one workflow state row per capstone project in step with exam \
                       results, defense requests, meetings and documents. Start with \
                       'capstone-tracker create-project' to register a project.")]
struct Cli {
    /// Configuration file (defaults to ./capstone-tracker.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Who is making the change, recorded as last_updated_by
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a project and create its workflow state
    CreateProject {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        title: String,
        /// Initial authoritative project status
        #[arg(long)]
        status: Option<String>,
        /// Initial phase (defaults to DRAFT)
        #[arg(long)]
        phase: Option<ProjectPhase>,
    },
    /// Change a project's authoritative status
    ProjectStatus {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        status: String,
    },
    /// Record a topic or thesis exam result
    Exam {
        #[arg(long)]
        id: i64,
        #[arg(long = "type", help = "topic or thesis")]
        exam_type: ExamType,
        #[arg(long, help = "pass, fail or pending")]
        result: ExamResult,
        /// Exam date, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record a defense request status change
    Defense {
        #[arg(long)]
        id: i64,
        #[arg(long = "type", help = "topic or thesis")]
        defense_type: ExamType,
        #[arg(long)]
        request_id: i64,
        #[arg(long, help = "submitted, scheduled or any other request status")]
        status: String,
    },
    /// Record meeting totals from the meeting log
    Meetings {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        total: u32,
        #[arg(long)]
        approved: u32,
    },
    /// Record the system test request snapshot
    SystemTest {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        request_id: i64,
        #[arg(long)]
        status: String,
    },
    /// Record the final document snapshot
    FinalDocument {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        document_id: i64,
        #[arg(long)]
        status: String,
    },
    /// Apply an advisory or administrative lifecycle event
    Advance {
        #[arg(long)]
        id: i64,
        #[arg(
            long,
            help = "advisor-requested, advisor-assigned, topic-submission-opened, \
                    thesis-submission-opened, archived or cancelled"
        )]
        event: LifecycleEvent,
    },
    /// Set or clear the current step label
    Step {
        #[arg(long)]
        id: i64,
        /// Step label; omit to clear
        #[arg(long)]
        step: Option<String>,
    },
    /// Flag a project as overdue
    Overdue {
        #[arg(long)]
        id: i64,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },
    /// Show one project's workflow state
    Show {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List workflow states
    List {
        #[arg(long)]
        phase: Option<ProjectPhase>,
        #[arg(long)]
        blocked: bool,
        #[arg(long)]
        overdue: bool,
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateProject { .. } => "create_project",
            Self::ProjectStatus { .. } => "project_status",
            Self::Exam { .. } => "exam",
            Self::Defense { .. } => "defense",
            Self::Meetings { .. } => "meetings",
            Self::SystemTest { .. } => "system_test",
            Self::FinalDocument { .. } => "final_document",
            Self::Advance { .. } => "advance",
            Self::Step { .. } => "step",
            Self::Overdue { .. } => "overdue",
            Self::Show { .. } => "show",
            Self::List { .. } => "list",
        }
    }

    fn project_id(&self) -> Option<ProjectId> {
        match self {
            Self::CreateProject { id, .. }
            | Self::ProjectStatus { id, .. }
            | Self::Exam { id, .. }
            | Self::Defense { id, .. }
            | Self::Meetings { id, .. }
            | Self::SystemTest { id, .. }
            | Self::FinalDocument { id, .. }
            | Self::Advance { id, .. }
            | Self::Step { id, .. }
            | Self::Overdue { id, .. }
            | Self::Show { id, .. } => Some(ProjectId(*id)),
            Self::List { .. } => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    CapstoneTrackerConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => CapstoneTrackerConfig::load_from(path)?,
        None => CapstoneTrackerConfig::load()?,
    };
    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async { run(cli, config).await });

    shutdown_telemetry();
    result
}

async fn run(cli: Cli, config: CapstoneTrackerConfig) -> Result<()> {
    let Some(database) = &config.database else {
        bail!("No database configured; set [database] in capstone-tracker.toml");
    };

    let db = DatabaseManager::new(database)
        .await
        .with_context(|| format!("Failed to open database at {}", database.url))?;
    let store = db.workflow_store(config.workflow.policy())?;

    let correlation_id = generate_correlation_id();
    let span = create_workflow_span(
        cli.command.name(),
        cli.command.project_id(),
        &correlation_id,
    );
    let timer = OperationTimer::new(cli.command.name());

    let result = execute(&db, &store, cli.command, cli.actor.as_deref())
        .instrument(span)
        .await;

    timer.finish();
    db.shutdown().await;
    result
}

async fn execute(
    db: &DatabaseManager,
    store: &WorkflowStateStore,
    command: Commands,
    actor: Option<&str>,
) -> Result<()> {
    match command {
        Commands::CreateProject {
            id,
            title,
            status,
            phase,
        } => {
            let project_id = ProjectId(id);
            db.insert_project(project_id, &title, status.as_deref())
                .await
                .with_context(|| format!("Failed to create project {project_id}"))?;
            let state = store
                .initialize_with_phase(project_id, phase.unwrap_or_default(), actor)
                .await?;
            println!("✅ Created project {project_id} '{title}'");
            print_state(&state);
        }
        Commands::ProjectStatus { id, status } => {
            let project_id = ProjectId(id);
            if !db.set_project_status(project_id, &status).await? {
                bail!("Project {project_id} not found");
            }
            println!("✅ Project {project_id} status set to '{status}'");
            println!("   Workflow snapshot refreshes on the next recorded event");
        }
        Commands::Exam {
            id,
            exam_type,
            result,
            date,
        } => {
            let state = store
                .record_exam_result(ProjectId(id), exam_type, result, date, actor)
                .await?;
            report(ProjectId(id), state);
        }
        Commands::Defense {
            id,
            defense_type,
            request_id,
            status,
        } => {
            let state = store
                .record_defense_request(
                    ProjectId(id),
                    defense_type,
                    request_id,
                    DefenseStatus::from(status),
                    actor,
                )
                .await?;
            report(ProjectId(id), state);
        }
        Commands::Meetings {
            id,
            total,
            approved,
        } => {
            if approved > total {
                bail!("Approved meetings ({approved}) exceed total meetings ({total})");
            }
            let state = store
                .record_meeting_progress(ProjectId(id), total, approved, actor)
                .await?;
            report(ProjectId(id), state);
        }
        Commands::SystemTest {
            id,
            request_id,
            status,
        } => {
            let state = store
                .record_system_test(ProjectId(id), request_id, &status, actor)
                .await?;
            report(ProjectId(id), state);
        }
        Commands::FinalDocument {
            id,
            document_id,
            status,
        } => {
            let state = store
                .record_final_document(ProjectId(id), document_id, &status, actor)
                .await?;
            report(ProjectId(id), state);
        }
        Commands::Advance { id, event } => {
            let state = store
                .apply_lifecycle_event(ProjectId(id), event, actor)
                .await?;
            report(ProjectId(id), state);
        }
        Commands::Step { id, step } => {
            let state = store.update_step(ProjectId(id), step, actor).await?;
            report(ProjectId(id), state);
        }
        Commands::Overdue { id, clear } => {
            let state = store.mark_overdue(ProjectId(id), !clear).await?;
            report(ProjectId(id), state);
        }
        Commands::Show { id, json } => {
            let Some(state) = store.get(ProjectId(id)).await? else {
                bail!("No workflow state for project {id}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&state);
                let flags = state.derived_flags();
                println!("   can submit topic defense:  {}", flags.can_submit_topic_defense);
                println!("   can submit thesis defense: {}", flags.can_submit_thesis_defense);
                println!("   document submission phase: {}", flags.is_document_submission_phase);
                println!("   complete:                  {}", flags.is_complete);
                println!("   actionable:                {}", flags.is_actionable);
            }
        }
        Commands::List {
            phase,
            blocked,
            overdue,
            json,
        } => {
            let filter = StateFilter {
                phase,
                blocked_only: blocked,
                overdue_only: overdue,
            };
            let states = store.list(&filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&states)?);
            } else if states.is_empty() {
                println!("No projects match");
            } else {
                for state in &states {
                    println!("{}", summary_line(state));
                }
                println!("\n{} project(s)", states.len());
            }
        }
    }

    Ok(())
}

fn report(project_id: ProjectId, state: Option<ProjectWorkflowState>) {
    match state {
        Some(state) => print_state(&state),
        None => println!("⚠️  No workflow state for project {project_id}; nothing recorded"),
    }
}

fn summary_line(state: &ProjectWorkflowState) -> String {
    let mut flags = Vec::new();
    if state.is_blocked {
        flags.push("blocked");
    }
    if state.is_overdue {
        flags.push("overdue");
    }
    format!(
        "#{:<6} {:<22} {}",
        state.project_id.0,
        state.current_phase.as_str(),
        flags.join(",")
    )
}

fn print_state(state: &ProjectWorkflowState) {
    println!("📋 Project {}", state.project_id);
    println!("   phase:    {}", state.current_phase);
    if let Some(step) = &state.current_step {
        println!("   step:     {step}");
    }
    if let Some(status) = &state.project_status {
        println!("   status:   {status}");
    }
    if let Some(reason) = &state.block_reason {
        println!("   blocked:  {reason}");
    }
    if state.is_overdue {
        println!("   overdue:  yes");
    }
    println!(
        "   meetings: {} ({} approved)",
        state.meeting_count, state.approved_meeting_count
    );
    if let (Some(kind), Some(at)) = (&state.last_activity_type, state.last_activity_at) {
        let by = state.last_updated_by.as_deref().unwrap_or("system");
        println!("   last:     {kind} by {by} at {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
}
