// crates/elspeth-core/tests/audited_client.rs
// ============================================================================
// Module: Audited Call Discipline Tests
// Description: Allocate-perform-record ordering and telemetry gating.
// ============================================================================

//! ## Overview
//! The telemetry event for an external call exists only if the recorder
//! accepted the call record. A failing recorder must suppress the event; the
//! exempt mode must perform the call without touching either.

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
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::states::CallStatus;
use elspeth_core::core::states::CallType;
use elspeth_core::interfaces::clients::AuditedCallRecorder;
use elspeth_core::interfaces::recorder::NewCall;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::interfaces::recorder::RecorderError;
use elspeth_core::interfaces::telemetry::TelemetryEvent;
use elspeth_core::interfaces::telemetry::TelemetrySender;
use elspeth_core::runtime::memory::InMemoryRecorder;
use serde_json::json;

// ============================================================================
// SECTION: Support
// ============================================================================

/// Recorder wrapper that can be switched to reject `record_call`.
struct FlakyRecorder {
    inner: InMemoryRecorder,
    fail_calls: AtomicBool,
}

impl Recorder for FlakyRecorder {
    fn begin_run(
        &self,
        config: &serde_json::Value,
        canonical_version: &str,
    ) -> Result<elspeth_core::core::records::RunRecord, RecorderError> {
        self.inner.begin_run(config, canonical_version)
    }

    fn finalize_run(
        &self,
        run_id: &RunId,
        status: elspeth_core::core::records::RunStatus,
    ) -> Result<(), RecorderError> {
        self.inner.finalize_run(run_id, status)
    }

    fn register_node(
        &self,
        run_id: &RunId,
        plugin_name: &str,
        plugin_version: &str,
        node_type: elspeth_core::core::records::NodeType,
        config: &serde_json::Value,
        schema: &serde_json::Value,
    ) -> Result<elspeth_core::core::records::NodeRecord, RecorderError> {
        self.inner.register_node(run_id, plugin_name, plugin_version, node_type, config, schema)
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: elspeth_core::core::records::EdgeMode,
    ) -> Result<elspeth_core::core::records::EdgeRecord, RecorderError> {
        self.inner.register_edge(run_id, from_node_id, to_node_id, label, mode)
    }

    fn record_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        data: &elspeth_core::core::results::RowData,
    ) -> Result<elspeth_core::core::records::RowRecord, RecorderError> {
        self.inner.record_row(run_id, source_node_id, row_index, data)
    }

    fn create_token(
        &self,
        row_id: &elspeth_core::core::identifiers::RowId,
        parent_token_id: Option<&elspeth_core::core::identifiers::TokenId>,
        branch_name: Option<&elspeth_core::core::identifiers::BranchName>,
    ) -> Result<elspeth_core::core::records::TokenRecord, RecorderError> {
        self.inner.create_token(row_id, parent_token_id, branch_name)
    }

    fn begin_node_state(
        &self,
        run_id: &RunId,
        token_id: &elspeth_core::core::identifiers::TokenId,
        node_id: &NodeId,
        step_index: u32,
        input_data: &serde_json::Value,
        attempt: u32,
    ) -> Result<elspeth_core::core::states::NodeStateRecord, RecorderError> {
        self.inner.begin_node_state(run_id, token_id, node_id, step_index, input_data, attempt)
    }

    fn complete_node_state(
        &self,
        state_id: &elspeth_core::core::identifiers::StateId,
        status: elspeth_core::core::states::NodeStateStatus,
        output_data: Option<&serde_json::Value>,
        error: Option<&serde_json::Value>,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        self.inner.complete_node_state(state_id, status, output_data, error, duration_ms)
    }

    fn record_routing_event(
        &self,
        state_id: &elspeth_core::core::identifiers::StateId,
        edge_id: &elspeth_core::core::identifiers::EdgeId,
        mode: elspeth_core::core::records::EdgeMode,
        reason: &serde_json::Value,
    ) -> Result<elspeth_core::core::states::RoutingEventRecord, RecorderError> {
        self.inner.record_routing_event(state_id, edge_id, mode, reason)
    }

    fn allocate_call_index(
        &self,
        state_id: &elspeth_core::core::identifiers::StateId,
    ) -> Result<u32, RecorderError> {
        self.inner.allocate_call_index(state_id)
    }

    fn record_call(
        &self,
        call: &NewCall<'_>,
    ) -> Result<elspeth_core::core::states::CallRecord, RecorderError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(RecorderError::Storage("disk on fire".to_string()));
        }
        self.inner.record_call(call)
    }

    fn record_token_outcome(
        &self,
        token_id: &elspeth_core::core::identifiers::TokenId,
        outcome: elspeth_core::core::states::TokenOutcome,
        error: Option<&serde_json::Value>,
    ) -> Result<elspeth_core::core::states::TokenOutcomeRecord, RecorderError> {
        self.inner.record_token_outcome(token_id, outcome, error)
    }

    fn record_validation_error(
        &self,
        run_id: &RunId,
        row_id: &elspeth_core::core::identifiers::RowId,
        node_id: &NodeId,
        schema_mode: &str,
        error: &str,
        destination: &str,
    ) -> Result<elspeth_core::core::states::ValidationErrorRecord, RecorderError> {
        self.inner.record_validation_error(run_id, row_id, node_id, schema_mode, error, destination)
    }

    fn record_transform_error(
        &self,
        run_id: &RunId,
        state_id: &elspeth_core::core::identifiers::StateId,
        token_id: &elspeth_core::core::identifiers::TokenId,
        transform_id: &NodeId,
        error_details: &serde_json::Value,
        destination: &str,
    ) -> Result<elspeth_core::core::states::TransformErrorRecord, RecorderError> {
        self.inner.record_transform_error(
            run_id,
            state_id,
            token_id,
            transform_id,
            error_details,
            destination,
        )
    }

    fn record_sink_artifact(
        &self,
        state_id: &elspeth_core::core::identifiers::StateId,
        sink_name: &elspeth_core::core::identifiers::SinkName,
        descriptor: &elspeth_core::core::states::ArtifactDescriptor,
    ) -> Result<elspeth_core::core::states::SinkArtifactRecord, RecorderError> {
        self.inner.record_sink_artifact(state_id, sink_name, descriptor)
    }
}

/// Prepares a recorder with one open node state and returns its id.
fn prepared_state(
    recorder: &dyn Recorder,
) -> (RunId, elspeth_core::core::identifiers::StateId) {
    let run = recorder.begin_run(&json!({}), "jcs-sha256-v1").unwrap();
    let node = recorder
        .register_node(&run.run_id, "llm", "1", elspeth_core::core::records::NodeType::Transform, &json!({}), &json!(null))
        .unwrap();
    let row = recorder
        .record_row(&run.run_id, &node.node_id, 0, &serde_json::Map::new())
        .unwrap();
    let token = recorder.create_token(&row.row_id, None, None).unwrap();
    let state = recorder
        .begin_node_state(&run.run_id, &token.token_id, &node.node_id, 1, &json!({}), 1)
        .unwrap();
    (run.run_id, state.state_id)
}

/// Coerces a concrete recorder into the shared trait-object handle.
fn coerce<R: Recorder + 'static>(recorder: &Arc<R>) -> Arc<dyn Recorder> {
    Arc::clone(recorder) as Arc<dyn Recorder>
}

// ============================================================================
// SECTION: Discipline
// ============================================================================

/// Successful calls are recorded and then reported to telemetry.
#[test]
fn test_success_records_call_then_emits_telemetry() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (run_id, state_id) = prepared_state(recorder.as_ref());

    let seen: Arc<Mutex<Vec<TelemetryEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sender = TelemetrySender::new(Arc::new(move |event| sink.lock().unwrap().push(event)));

    let client = AuditedCallRecorder::new(coerce(&recorder), state_id)
        .with_telemetry(run_id, sender);
    let outcome = client
        .record_call(CallType::Llm, &json!({"prompt": "hi"}), || Ok(json!({"reply": "ok"})))
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.call_index, Some(0));
    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Success);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

/// Failed calls are still recorded, with the error detail.
#[test]
fn test_error_calls_are_recorded() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (_run, state_id) = prepared_state(recorder.as_ref());

    let client = AuditedCallRecorder::new(coerce(&recorder), state_id);
    let outcome = client
        .record_call(CallType::Http, &json!({"url": "x"}), || Err(json!({"status": 500})))
        .unwrap();

    assert!(!outcome.is_success());
    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Error);
    assert!(calls[0].response_hash.is_none());
}

/// A recorder failure suppresses the telemetry event entirely.
#[test]
fn test_recorder_failure_blocks_telemetry() {
    let recorder = Arc::new(FlakyRecorder {
        inner: InMemoryRecorder::new(),
        fail_calls: AtomicBool::new(false),
    });
    let (run_id, state_id) = prepared_state(recorder.as_ref());
    recorder.fail_calls.store(true, Ordering::SeqCst);

    let seen: Arc<Mutex<Vec<TelemetryEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sender = TelemetrySender::new(Arc::new(move |event| sink.lock().unwrap().push(event)));

    let client = AuditedCallRecorder::new(coerce(&recorder), state_id)
        .with_telemetry(run_id, sender);
    let result =
        client.record_call(CallType::Llm, &json!({"prompt": "hi"}), || Ok(json!({"ok": true})));

    assert!(result.is_err());
    assert!(seen.lock().unwrap().is_empty());
}

/// Exempt mode performs the call without recording anything.
#[test]
fn test_exempt_mode_performs_without_recording() {
    let client = AuditedCallRecorder::exempt();
    let outcome = client
        .record_call(CallType::Http, &json!({"probe": true}), || Ok(json!({"alive": true})))
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.call_index, None);
}

/// Call indices allocate monotonically per state.
#[test]
fn test_call_indices_are_monotonic() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (_run, state_id) = prepared_state(recorder.as_ref());

    let client = AuditedCallRecorder::new(coerce(&recorder), state_id);
    for expected in 0_u32 .. 3 {
        let outcome = client
            .record_call(CallType::Sql, &json!({"q": expected}), || Ok(json!(expected)))
            .unwrap();
        assert_eq!(outcome.call_index, Some(expected));
    }
}
