// crates/elspeth-store-sqlite/tests/sqlite_recorder_unit.rs
// ============================================================================
// Module: SQLite Recorder Unit Tests
// Description: Uniqueness, idempotency, concurrency, lineage, and resume.
// ============================================================================

//! ## Overview
//! The durable store must surface double recording as typed errors, keep
//! `record_row` idempotent, serialize call-index allocation across threads,
//! reconstruct lineage from the stored record alone, and derive a resume
//! cursor that skips finished rows.

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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RowId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::StateId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::records::EdgeMode;
use elspeth_core::core::records::NodeType;
use elspeth_core::core::records::RunStatus;
use elspeth_core::core::results::RowData;
use elspeth_core::core::states::ArtifactDescriptor;
use elspeth_core::core::states::CallStatus;
use elspeth_core::core::states::CallType;
use elspeth_core::core::states::NodeStateStatus;
use elspeth_core::core::states::TokenOutcome;
use elspeth_core::interfaces::recorder::NewCall;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::interfaces::recorder::RecorderError;
use elspeth_store_sqlite::SqliteRecorder;
use elspeth_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens a file-backed recorder in a temp directory.
fn open_recorder(dir: &TempDir) -> SqliteRecorder {
    SqliteRecorder::open(&SqliteStoreConfig::new(dir.path().join("landscape.db"))).unwrap()
}

/// Seeds a run with one source node.
fn seed_run(recorder: &SqliteRecorder) -> (RunId, NodeId) {
    let run = recorder.begin_run(&json!({"pipeline": "test"}), "jcs-sha256-v1").unwrap();
    let node = recorder
        .register_node(&run.run_id, "src", "1", NodeType::Source, &json!({}), &json!(null))
        .unwrap();
    (run.run_id, node.node_id)
}

/// Builds a row object with one field.
fn sample_row(n: i64) -> RowData {
    let mut row = RowData::new();
    row.insert("n".to_string(), json!(n));
    row
}

/// Seeds a run, row, token, and open state; returns the state id.
fn seed_state(recorder: &SqliteRecorder) -> (RunId, NodeId, RowId, TokenId, StateId) {
    let (run_id, node_id) = seed_run(recorder);
    let row = recorder.record_row(&run_id, &node_id, 0, &sample_row(1)).unwrap();
    let token = recorder.create_token(&row.row_id, None, None).unwrap();
    let state = recorder
        .begin_node_state(&run_id, &token.token_id, &node_id, 0, &json!({"n": 1}), 1)
        .unwrap();
    (run_id, node_id, row.row_id, token.token_id, state.state_id)
}

// ============================================================================
// SECTION: Runs and Rows
// ============================================================================

/// Runs begin as running and finalize with an end timestamp.
#[test]
fn test_run_lifecycle() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, _node) = seed_run(&recorder);

    let loaded = recorder.run_record(&run_id).unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Running);
    assert!(loaded.completed_at.is_none());

    recorder.finalize_run(&run_id, RunStatus::Completed).unwrap();
    let finalized = recorder.run_record(&run_id).unwrap().unwrap();
    assert_eq!(finalized.status, RunStatus::Completed);
    assert!(finalized.completed_at.is_some());
}

/// record_row is idempotent on (run, source, index).
#[test]
fn test_record_row_idempotent() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, node_id) = seed_run(&recorder);

    let first = recorder.record_row(&run_id, &node_id, 7, &sample_row(1)).unwrap();
    let second = recorder.record_row(&run_id, &node_id, 7, &sample_row(1)).unwrap();
    assert_eq!(first.row_id, second.row_id);
    assert_eq!(first.row_hash, second.row_hash);
}

/// Tokens require an existing row (foreign key).
#[test]
fn test_token_requires_row() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (_run, _node) = seed_run(&recorder);

    let result = recorder.create_token(&RowId::new("row-ghost"), None, None);
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

// ============================================================================
// SECTION: States and Calls
// ============================================================================

/// Duplicate (token, node, attempt) surfaces as a duplicate error.
#[test]
fn test_duplicate_node_state_rejected() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, node_id, _row, token_id, _state) = seed_state(&recorder);

    let duplicate =
        recorder.begin_node_state(&run_id, &token_id, &node_id, 0, &json!({}), 1);
    assert!(matches!(duplicate, Err(RecorderError::Duplicate(_))));
}

/// Duplicate (state, call_index) surfaces as a duplicate error.
#[test]
fn test_duplicate_call_index_rejected() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (_run, _node, _row, _token, state_id) = seed_state(&recorder);

    let index = recorder.allocate_call_index(&state_id).unwrap();
    let call = NewCall {
        state_id: &state_id,
        call_index: index,
        call_type: CallType::Llm,
        status: CallStatus::Success,
        request_data: &json!({"prompt": "hi"}),
        response_data: Some(&json!({"ok": true})),
        error: None,
        latency_ms: 12,
        request_ref: None,
        response_ref: None,
    };
    recorder.record_call(&call).unwrap();
    let duplicate = recorder.record_call(&call);
    assert!(matches!(duplicate, Err(RecorderError::Duplicate(_))));
}

/// Terminal outcomes are exactly-once per token.
#[test]
fn test_duplicate_outcome_rejected() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (_run, _node, _row, token_id, _state) = seed_state(&recorder);

    recorder.record_token_outcome(&token_id, TokenOutcome::Completed, None).unwrap();
    let duplicate = recorder.record_token_outcome(&token_id, TokenOutcome::Failed, None);
    assert!(matches!(duplicate, Err(RecorderError::Duplicate(_))));
}

/// Call-index allocation is serialized across threads.
#[test]
fn test_call_index_allocation_is_thread_safe() {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(open_recorder(&dir));
    let (_run, _node, _row, _token, state_id) = seed_state(recorder.as_ref());

    let mut handles = Vec::new();
    for _ in 0 .. 4 {
        let recorder = Arc::clone(&recorder);
        let state_id = state_id.clone();
        handles.push(thread::spawn(move || {
            let mut allocated = Vec::new();
            for _ in 0 .. 25 {
                allocated.push(recorder.allocate_call_index(&state_id).unwrap());
            }
            allocated
        }));
    }
    let mut seen = BTreeSet::new();
    for handle in handles {
        for index in handle.join().unwrap() {
            assert!(seen.insert(index), "index {index} allocated twice");
        }
    }
    assert_eq!(seen.len(), 100);
    assert_eq!(seen.iter().next_back().copied(), Some(99));
}

// ============================================================================
// SECTION: Lineage and Resume
// ============================================================================

/// Lineage reconstructs states, events, calls, and the outcome.
#[test]
fn test_token_lineage_reconstruction() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, node_id, _row, token_id, state_id) = seed_state(&recorder);

    let sink_node = recorder
        .register_node(&run_id, "out", "1", NodeType::Sink, &json!({}), &json!(null))
        .unwrap();
    let edge = recorder
        .register_edge(&run_id, &node_id, &sink_node.node_id, "continue", EdgeMode::Move)
        .unwrap();
    recorder
        .record_routing_event(&state_id, &edge.edge_id, EdgeMode::Move, &json!({"why": "spine"}))
        .unwrap();
    recorder
        .complete_node_state(&state_id, NodeStateStatus::Completed, Some(&json!({"n": 1})), None, 3)
        .unwrap();
    let index = recorder.allocate_call_index(&state_id).unwrap();
    recorder
        .record_call(&NewCall {
            state_id: &state_id,
            call_index: index,
            call_type: CallType::Http,
            status: CallStatus::Success,
            request_data: &json!({"url": "x"}),
            response_data: Some(&json!({"code": 200})),
            error: None,
            latency_ms: 8,
            request_ref: None,
            response_ref: None,
        })
        .unwrap();
    recorder
        .record_sink_artifact(
            &state_id,
            &elspeth_core::core::identifiers::SinkName::new("out"),
            &ArtifactDescriptor {
                artifact_type: "file".to_string(),
                path_or_uri: "out.jsonl".to_string(),
                size_bytes: 42,
                content_hash: elspeth_core::core::hashing::hash_bytes(
                    elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM,
                    b"x",
                ),
                metadata: None,
            },
        )
        .unwrap();
    recorder.record_token_outcome(&token_id, TokenOutcome::Completed, None).unwrap();

    let lineage = recorder.token_lineage(&token_id).unwrap();
    assert_eq!(lineage.node_states.len(), 1);
    assert_eq!(lineage.node_states[0].status, NodeStateStatus::Completed);
    assert_eq!(lineage.node_states[0].duration_ms, Some(3));
    assert_eq!(lineage.routing_events.len(), 1);
    assert_eq!(lineage.calls.len(), 1);
    assert_eq!(lineage.artifacts.len(), 1);
    assert_eq!(lineage.outcome.as_ref().map(|outcome| outcome.outcome), Some(TokenOutcome::Completed));
    assert!(lineage.parents.is_empty());

    // Row lineage resolves through the most recent root token.
    let by_row = recorder.row_lineage(&lineage.row.row_id).unwrap();
    assert_eq!(by_row.token.token_id, token_id);
}

/// Fork children surface their parent chain root-first.
#[test]
fn test_lineage_parent_chain() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (_run, node_id, row_id, token_id, _state) = seed_state(&recorder);
    let _node = node_id;

    let child = recorder
        .create_token(
            &row_id,
            Some(&token_id),
            Some(&elspeth_core::core::identifiers::BranchName::new("a")),
        )
        .unwrap();
    let lineage = recorder.token_lineage(&child.token_id).unwrap();
    assert_eq!(lineage.parents.len(), 1);
    assert_eq!(lineage.parents[0].token_id, token_id);
    assert_eq!(
        lineage.token.branch_name,
        Some(elspeth_core::core::identifiers::BranchName::new("a"))
    );
}

/// The resume cursor skips finished rows and replays unfinished ones.
#[test]
fn test_resume_state_reconstruction() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, node_id) = seed_run(&recorder);

    // Row 0 finished: its token has an outcome.
    let done = recorder.record_row(&run_id, &node_id, 0, &sample_row(0)).unwrap();
    let done_token = recorder.create_token(&done.row_id, None, None).unwrap();
    recorder
        .begin_node_state(&run_id, &done_token.token_id, &node_id, 0, &json!({}), 1)
        .unwrap();
    recorder.record_token_outcome(&done_token.token_id, TokenOutcome::Completed, None).unwrap();

    // Row 1 unfinished: a completed step-0 state but no outcome.
    let pending = recorder.record_row(&run_id, &node_id, 1, &sample_row(1)).unwrap();
    let pending_token = recorder.create_token(&pending.row_id, None, None).unwrap();
    let state = recorder
        .begin_node_state(&run_id, &pending_token.token_id, &node_id, 0, &json!({}), 1)
        .unwrap();
    recorder
        .complete_node_state(&state.state_id, NodeStateStatus::Completed, None, None, 0)
        .unwrap();

    let resume = recorder.resume_state(&run_id).unwrap();
    assert_eq!(resume.cursor, 1);
    assert!(resume.completed.is_empty());
    let progress = resume.partial.get(&1).unwrap();
    assert_eq!(progress.row_id, pending.row_id);
    assert_eq!(progress.last_completed_step, 0);
}

/// verify_run passes on a coherent record and flags open tokens.
#[test]
fn test_verify_run_checks_invariants() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, _node, _row, token_id, state_id) = seed_state(&recorder);

    // Open state and missing outcome: verification must fail.
    let before = recorder.verify_run(&run_id).unwrap();
    assert!(!before.passed);

    recorder
        .complete_node_state(&state_id, NodeStateStatus::Completed, None, None, 0)
        .unwrap();
    recorder.record_token_outcome(&token_id, TokenOutcome::Completed, None).unwrap();
    let after = recorder.verify_run(&run_id).unwrap();
    assert!(after.passed, "unexpected failures: {:?}", after.checks);
}

/// resume_run flips a finalized run back to resumed.
#[test]
fn test_resume_run_updates_status() {
    let dir = TempDir::new().unwrap();
    let recorder = open_recorder(&dir);
    let (run_id, _node) = seed_run(&recorder);
    recorder.finalize_run(&run_id, RunStatus::Failed).unwrap();

    recorder.resume_run(&run_id).unwrap();
    let record = recorder.run_record(&run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Resumed);
    assert!(record.completed_at.is_none());
}
