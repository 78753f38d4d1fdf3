// crates/elspeth-cli/src/main.rs
// ============================================================================
// Module: ELSPETH CLI Entry Point
// Description: Command dispatcher for pipeline runs and Landscape queries.
// Purpose: Run pipelines, resume interrupted runs, and answer "what happened
//          to row X and why" from the stored record.
// Dependencies: clap, elspeth-core, elspeth-config, elspeth-plugins,
//               elspeth-store-sqlite, serde_json, tracing-subscriber
// ============================================================================

//! ## Overview
//! Five commands: `run` starts a pipeline from a settings file, `resume`
//! continues an interrupted run, `explain` prints a token's full lineage as
//! structured JSON, `dag` renders the execution graph (DIVERT edges dashed),
//! and `verify` re-checks a run's audit trail against the engine invariants.
//! Exit code is zero only when the command (and for `run`, the run itself)
//! completed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use elspeth_config::Settings;
use elspeth_core::core::identifiers::RowId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::records::EdgeMode;
use elspeth_core::core::records::RunStatus;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::runtime::memory::InMemoryRecorder;
use elspeth_core::runtime::orchestrator::Orchestrator;
use elspeth_core::runtime::orchestrator::RunMode;
use elspeth_core::runtime::orchestrator::RunResult;
use elspeth_plugins::build_definition;
use elspeth_plugins::build_exporters;
use elspeth_store_sqlite::SqliteRecorder;
use elspeth_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "elspeth", arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new pipeline run.
    Run(RunCommand),
    /// Resume an interrupted run.
    Resume(ResumeCommand),
    /// Print the full lineage of a row or token.
    Explain(ExplainCommand),
    /// Print the execution graph as a node/edge list plus Mermaid.
    Dag(DagCommand),
    /// Re-check a run's audit trail against the engine invariants.
    Verify(VerifyCommand),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Path to the settings TOML file.
    settings: PathBuf,
    /// Path to the Landscape database.
    #[arg(long, value_name = "PATH", default_value = "elspeth.db")]
    db: PathBuf,
}

/// Arguments for `resume`.
#[derive(Args, Debug)]
struct ResumeCommand {
    /// Run identifier to resume.
    run_id: String,
    /// Path to the settings TOML file.
    settings: PathBuf,
    /// Path to the Landscape database.
    #[arg(long, value_name = "PATH", default_value = "elspeth.db")]
    db: PathBuf,
}

/// Arguments for `explain`.
#[derive(Args, Debug)]
struct ExplainCommand {
    /// Run identifier the row or token belongs to.
    run_id: String,
    /// Row or token identifier.
    id: String,
    /// Path to the Landscape database.
    #[arg(long, value_name = "PATH", default_value = "elspeth.db")]
    db: PathBuf,
}

/// Arguments for `dag`.
#[derive(Args, Debug)]
struct DagCommand {
    /// Path to the settings TOML file.
    settings: PathBuf,
}

/// Arguments for `verify`.
#[derive(Args, Debug)]
struct VerifyCommand {
    /// Run identifier to verify.
    run_id: String,
    /// Path to the Landscape database.
    #[arg(long, value_name = "PATH", default_value = "elspeth.db")]
    db: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Wraps any displayable error.
    fn from_display(error: impl std::fmt::Display) -> Self {
        Self {
            message: error.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry point.
fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(code) => code,
        Err(error) => {
            let mut err = std::io::stderr().lock();
            let _ignored = writeln!(err, "error: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches one parsed command.
fn dispatch(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Run(command) => run_pipeline(&command),
        Commands::Resume(command) => resume_pipeline(&command),
        Commands::Explain(command) => explain(&command),
        Commands::Dag(command) => render_dag(&command),
        Commands::Verify(command) => verify(&command),
    }
}

// ============================================================================
// SECTION: Run and Resume
// ============================================================================

/// Starts a new run; exit code reflects the terminal run status.
fn run_pipeline(command: &RunCommand) -> Result<ExitCode, CliError> {
    let settings = Settings::load(&command.settings).map_err(CliError::from_display)?;
    let definition = build_definition(&settings).map_err(CliError::from_display)?;
    let exporters = build_exporters(&settings).map_err(CliError::from_display)?;
    let recorder = Arc::new(
        SqliteRecorder::open(&SqliteStoreConfig::new(&command.db))
            .map_err(CliError::from_display)?,
    );
    let orchestrator = Orchestrator::new(recorder, definition, exporters, RunMode::New)
        .map_err(CliError::from_display)?;
    finish_run(orchestrator.run())
}

/// Resumes an interrupted run from its Landscape cursor.
fn resume_pipeline(command: &ResumeCommand) -> Result<ExitCode, CliError> {
    let settings = Settings::load(&command.settings).map_err(CliError::from_display)?;
    if !settings.checkpoint.enabled {
        warn!("checkpointing is disabled in settings; resuming from the audit trail alone");
    }
    let definition = build_definition(&settings).map_err(CliError::from_display)?;
    let exporters = build_exporters(&settings).map_err(CliError::from_display)?;
    let recorder = Arc::new(
        SqliteRecorder::open(&SqliteStoreConfig::new(&command.db))
            .map_err(CliError::from_display)?,
    );
    let run_id = RunId::new(&command.run_id);
    let existing = recorder.run_record(&run_id).map_err(CliError::from_display)?;
    if existing.is_none() {
        return Err(CliError::from_display(format!("unknown run {run_id}")));
    }
    let state = recorder.resume_state(&run_id).map_err(CliError::from_display)?;
    recorder.resume_run(&run_id).map_err(CliError::from_display)?;
    let orchestrator = Orchestrator::new(
        recorder,
        definition,
        exporters,
        RunMode::Resume {
            run_id,
            state,
        },
    )
    .map_err(CliError::from_display)?;
    finish_run(orchestrator.run())
}

/// Prints the run summary and converts the status into an exit code.
fn finish_run(
    outcome: Result<RunResult, elspeth_core::runtime::error::EngineError>,
) -> Result<ExitCode, CliError> {
    let result = outcome.map_err(CliError::from_display)?;
    let summary = json!({
        "run_id": result.run_id.as_str(),
        "status": result.status,
        "counters": {
            "rows_processed": result.counters.rows_processed,
            "rows_succeeded": result.counters.rows_succeeded,
            "rows_failed": result.counters.rows_failed,
            "rows_routed": result.counters.rows_routed,
            "rows_quarantined": result.counters.rows_quarantined,
            "rows_forked": result.counters.rows_forked,
            "rows_coalesced": result.counters.rows_coalesced,
            "rows_coalesce_failed": result.counters.rows_coalesce_failed,
            "rows_consumed_in_batch": result.counters.rows_consumed_in_batch,
        },
        "artifacts": result.artifacts.len(),
    });
    print_json(&summary)?;
    Ok(if result.status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ============================================================================
// SECTION: Explain and Verify
// ============================================================================

/// Prints the full lineage of a row or token as structured JSON.
fn explain(command: &ExplainCommand) -> Result<ExitCode, CliError> {
    let recorder = SqliteRecorder::open(&SqliteStoreConfig::new(&command.db))
        .map_err(CliError::from_display)?;
    let lineage = recorder
        .token_lineage(&TokenId::new(&command.id))
        .or_else(|_| recorder.row_lineage(&RowId::new(&command.id)))
        .map_err(CliError::from_display)?;
    if lineage.row.run_id.as_str() != command.run_id {
        return Err(CliError::from_display(format!(
            "id '{}' belongs to run {}, not {}",
            command.id, lineage.row.run_id, command.run_id
        )));
    }
    let rendered = serde_json::to_value(&lineage).map_err(CliError::from_display)?;
    print_json(&rendered)?;
    Ok(ExitCode::SUCCESS)
}

/// Verifies a run's audit trail and prints the report.
fn verify(command: &VerifyCommand) -> Result<ExitCode, CliError> {
    let recorder = SqliteRecorder::open(&SqliteStoreConfig::new(&command.db))
        .map_err(CliError::from_display)?;
    let run_id = RunId::new(&command.run_id);
    if recorder.run_record(&run_id).map_err(CliError::from_display)?.is_none() {
        return Err(CliError::from_display(format!("unknown run {run_id}")));
    }
    let report = recorder.verify_run(&run_id).map_err(CliError::from_display)?;
    let rendered = serde_json::to_value(&report).map_err(CliError::from_display)?;
    print_json(&rendered)?;
    Ok(if report.passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ============================================================================
// SECTION: DAG Rendering
// ============================================================================

/// Builds the execution graph against an in-memory recorder and renders it.
fn render_dag(command: &DagCommand) -> Result<ExitCode, CliError> {
    let settings = Settings::load(&command.settings).map_err(CliError::from_display)?;
    let definition = build_definition(&settings).map_err(CliError::from_display)?;
    let recorder = Arc::new(InMemoryRecorder::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&recorder) as Arc<dyn Recorder>,
        definition,
        Vec::new(),
        RunMode::New,
    )
    .map_err(CliError::from_display)?;
    drop(orchestrator);

    let nodes = recorder.nodes();
    let edges = recorder.edges();
    let mut out = std::io::stdout().lock();
    writeln!(out, "nodes:").map_err(CliError::from_display)?;
    for node in &nodes {
        writeln!(
            out,
            "  {}  {:<12}  {}",
            node.node_id,
            format_node_type(node),
            node.plugin_name
        )
        .map_err(CliError::from_display)?;
    }
    writeln!(out, "edges:").map_err(CliError::from_display)?;
    for edge in &edges {
        writeln!(
            out,
            "  {} -[{} {}]-> {}",
            edge.from_node_id,
            edge.label,
            mode_label(edge.default_mode),
            edge.to_node_id
        )
        .map_err(CliError::from_display)?;
    }

    writeln!(out).map_err(CliError::from_display)?;
    writeln!(out, "```mermaid").map_err(CliError::from_display)?;
    writeln!(out, "flowchart TD").map_err(CliError::from_display)?;
    for node in &nodes {
        writeln!(
            out,
            "    {}[\"{} ({})\"]",
            mermaid_id(node.node_id.as_str()),
            node.plugin_name,
            format_node_type(node)
        )
        .map_err(CliError::from_display)?;
    }
    for edge in &edges {
        // DIVERT edges render dashed so quarantine and error routes stand out.
        let arrow = if edge.default_mode == EdgeMode::Divert { "-.->" } else { "-->" };
        writeln!(
            out,
            "    {} {arrow}|{}| {}",
            mermaid_id(edge.from_node_id.as_str()),
            edge.label,
            mermaid_id(edge.to_node_id.as_str())
        )
        .map_err(CliError::from_display)?;
    }
    writeln!(out, "```").map_err(CliError::from_display)?;
    Ok(ExitCode::SUCCESS)
}

/// Renders a node's type label.
fn format_node_type(node: &elspeth_core::core::records::NodeRecord) -> &'static str {
    match node.node_type {
        elspeth_core::core::records::NodeType::Source => "source",
        elspeth_core::core::records::NodeType::Transform => "transform",
        elspeth_core::core::records::NodeType::Gate => "gate",
        elspeth_core::core::records::NodeType::Coalesce => "coalesce",
        elspeth_core::core::records::NodeType::Aggregation => "aggregation",
        elspeth_core::core::records::NodeType::Sink => "sink",
    }
}

/// Renders an edge mode label.
const fn mode_label(mode: EdgeMode) -> &'static str {
    match mode {
        EdgeMode::Move => "move",
        EdgeMode::Copy => "copy",
        EdgeMode::Divert => "divert",
    }
}

/// Mermaid-safe node identifier.
fn mermaid_id(raw: &str) -> String {
    raw.replace('-', "_")
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Prints a JSON value to stdout with stable formatting.
fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).map_err(CliError::from_display)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{rendered}").map_err(CliError::from_display)
}
