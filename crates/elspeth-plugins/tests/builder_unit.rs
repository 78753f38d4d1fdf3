// crates/elspeth-plugins/tests/builder_unit.rs
// ============================================================================
// Module: Builder and Registry Tests
// Description: Settings-to-definition assembly and registry failure modes.
// ============================================================================

//! ## Overview
//! The builder must assemble a runnable definition from settings, resolve
//! built-in plugin names, and fail closed on unknown names. The assembled
//! definition is proven runnable by an end-to-end run against the in-memory
//! recorder.

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

use std::sync::Arc;

use elspeth_config::Settings;
use elspeth_core::core::records::RunStatus;
use elspeth_core::core::results::ErrorDisposition;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::runtime::memory::InMemoryRecorder;
use elspeth_core::runtime::orchestrator::Orchestrator;
use elspeth_core::runtime::orchestrator::RunMode;
use elspeth_plugins::PluginRegistry;
use elspeth_plugins::RegistryError;
use elspeth_plugins::build_definition;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Unknown plugin names fail with a typed error.
#[test]
fn test_unknown_plugin_names_rejected() {
    let registry = PluginRegistry::builtin();
    let source =
        registry.build_source("csv", &json!({}), ErrorDisposition::Discard);
    assert!(matches!(source, Err(RegistryError::Unknown { .. })));
    let transform = registry.build_transform("llm", "t-0", &json!({}));
    assert!(matches!(transform, Err(RegistryError::Unknown { .. })));
    let sink = registry.build_sink("s3", "out", &json!({}));
    assert!(matches!(sink, Err(RegistryError::Unknown { .. })));
}

/// Constructor option errors surface as construction failures.
#[test]
fn test_bad_options_rejected() {
    let registry = PluginRegistry::builtin();
    let source = registry.build_source(
        "json_lines",
        &json!({"unexpected": true}),
        ErrorDisposition::Discard,
    );
    assert!(matches!(source, Err(RegistryError::Construction { .. })));
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// A static-source pipeline built from settings runs to completion.
#[test]
fn test_built_definition_runs() {
    let dir = TempDir::new().unwrap();
    let out_path = dir.path().join("out.jsonl");
    let raw = format!(
        r#"
default_sink = "out"

[datasource]
plugin = "static"
[datasource.options]
rows = [{{ n = 1 }}, {{ n = 2 }}]

[[transforms]]
plugin = "field"
node_id = "shape"
[transforms.options.multiply]
n = 3

[sinks.out]
plugin = "json_lines"
[sinks.out.options]
path = "{}"
"#,
        out_path.display()
    );
    let settings = Settings::parse(&raw).unwrap();
    let definition = build_definition(&settings).unwrap();

    let recorder = Arc::new(InMemoryRecorder::new());
    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New).unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.counters.rows_succeeded, 2);
    let written = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"{"n":3}"#);
    assert_eq!(lines[1], r#"{"n":6}"#);
}

/// Gate settings compile into a working condition gate.
#[test]
fn test_condition_gate_routes_from_settings() {
    let raw = r#"
default_sink = "out"

[datasource]
plugin = "static"
[datasource.options]
rows = [{ n = 1 }, { n = 10 }]

[[gates]]
name = "splitter"
condition = "n >= 5"
[gates.routes]
pass = "big"
fail = "continue"

[sinks.out]
plugin = "memory"

[sinks.big]
plugin = "memory"
"#;
    let settings = Settings::parse(raw).unwrap();
    let definition = build_definition(&settings).unwrap();

    let recorder = Arc::new(InMemoryRecorder::new());
    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New).unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_succeeded, 1);
    assert_eq!(result.counters.rows_routed, 1);
}
