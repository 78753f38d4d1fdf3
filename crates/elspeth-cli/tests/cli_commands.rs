// crates/elspeth-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: End-to-end run, explain, dag, and verify through the binary.
// ============================================================================

//! ## Overview
//! Drives the compiled `elspeth` binary: a run must exit zero and leave a
//! Landscape behind, `dag` must render dashed DIVERT edges, `explain` must
//! reconstruct lineage from the database, and `verify` must pass on a clean
//! run.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::path::Path;
use std::process::Command;
use std::process::Output;

use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs the elspeth binary with the given arguments.
fn elspeth(args: &[&str], current_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_elspeth"))
        .args(args)
        .current_dir(current_dir)
        .output()
        .expect("binary should execute")
}

/// Writes a minimal settings file into the directory.
fn write_settings(dir: &Path) -> std::path::PathBuf {
    let out = dir.join("out.jsonl");
    let raw = format!(
        r#"
default_sink = "out"

[datasource]
plugin = "static"
[datasource.options]
rows = [{{ n = 1 }}, {{ n = 2 }}, {{ n = 3 }}]

[[transforms]]
plugin = "field"
node_id = "shape"
[transforms.options.multiply]
n = 2

[sinks.out]
plugin = "json_lines"
[sinks.out.options]
path = "{}"
"#,
        out.display()
    );
    let path = dir.join("pipeline.toml");
    std::fs::write(&path, raw).unwrap();
    path
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// `run` exits zero, prints counters, and writes the sink artifact.
#[test]
fn test_run_command_completes() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let output = elspeth(
        &["run", settings.to_str().unwrap(), "--db", "landscape.db"],
        dir.path(),
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"rows_processed\": 3"));
    assert!(stdout.contains("\"rows_succeeded\": 3"));
    assert!(dir.path().join("landscape.db").exists());
    let written = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 3);
}

/// `verify` passes on a freshly completed run.
#[test]
fn test_verify_command_passes() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let run = elspeth(
        &["run", settings.to_str().unwrap(), "--db", "landscape.db"],
        dir.path(),
    );
    assert!(run.status.success());
    let stdout = String::from_utf8_lossy(&run.stdout);
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    let run_id = summary.get("run_id").unwrap().as_str().unwrap();

    let verify = elspeth(&["verify", run_id, "--db", "landscape.db"], dir.path());
    assert!(verify.status.success(), "stderr: {}", String::from_utf8_lossy(&verify.stderr));
    let report = String::from_utf8_lossy(&verify.stdout);
    assert!(report.contains("\"passed\": true"));
}

/// `explain` reconstructs a row's lineage as JSON.
#[test]
fn test_explain_command_prints_lineage() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(dir.path());
    let run = elspeth(
        &["run", settings.to_str().unwrap(), "--db", "landscape.db"],
        dir.path(),
    );
    assert!(run.status.success());
    let summary: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&run.stdout).trim()).unwrap();
    let run_id = summary.get("run_id").unwrap().as_str().unwrap();

    // Resolve a real row identifier from the Landscape before explaining it.
    let recorder = elspeth_store_sqlite::SqliteRecorder::open(
        &elspeth_store_sqlite::SqliteStoreConfig::new(dir.path().join("landscape.db")),
    )
    .unwrap();
    let rows = recorder
        .run_rows(&elspeth_core::core::identifiers::RunId::new(run_id))
        .unwrap();
    let row_id = rows[0].row_id.as_str().to_string();
    drop(recorder);

    let explain = elspeth(&["explain", run_id, &row_id, "--db", "landscape.db"], dir.path());
    let stdout = String::from_utf8_lossy(&explain.stdout);
    let stderr = String::from_utf8_lossy(&explain.stderr);
    assert!(
        explain.status.success(),
        "stdout: {stdout} stderr: {stderr}"
    );
    let lineage: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert!(lineage.get("token").is_some());
    assert!(lineage.get("node_states").unwrap().as_array().unwrap().len() >= 2);
    assert!(lineage.get("outcome").unwrap().get("outcome").is_some());
}

/// `dag` renders nodes, labeled edges, and dashed DIVERT edges in Mermaid.
#[test]
fn test_dag_command_renders_divert_dashed() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.jsonl");
    let raw = format!(
        r#"
default_sink = "out"

[datasource]
plugin = "static"
[datasource.options]
rows = [{{ n = 1 }}]

[source]
on_validation_failure = "quarantine"

[[transforms]]
plugin = "field"
node_id = "shape"
on_error = "errors"
[transforms.options.multiply]
n = 2

[sinks.out]
plugin = "json_lines"
[sinks.out.options]
path = "{}"

[sinks.errors]
plugin = "memory"

[sinks.quarantine]
plugin = "memory"
"#,
        out.display()
    );
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, raw).unwrap();

    let dag = elspeth(&["dag", path.to_str().unwrap()], dir.path());
    assert!(dag.status.success(), "stderr: {}", String::from_utf8_lossy(&dag.stderr));
    let stdout = String::from_utf8_lossy(&dag.stdout);
    assert!(stdout.contains("nodes:"));
    assert!(stdout.contains("edges:"));
    assert!(stdout.contains("flowchart TD"));
    assert!(stdout.contains("__quarantine__"));
    assert!(stdout.contains("__error_0__"));
    assert!(stdout.contains("-.->"), "DIVERT edges must render dashed:\n{stdout}");
}
