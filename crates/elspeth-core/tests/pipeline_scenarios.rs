// crates/elspeth-core/tests/pipeline_scenarios.rs
// ============================================================================
// Module: Pipeline Scenario Tests
// Description: End-to-end runs over the in-memory recorder.
// ============================================================================

//! ## Overview
//! Drives the orchestrator through the canonical shapes: a simple spine,
//! fork/coalesce union, a starved require_all coalesce, source quarantine,
//! transform error routing, gate routing and discard, retry attempts, and an
//! aggregation flush. Each test asserts counters and the persisted record,
//! not just return values.

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

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::CollectSink;
use common::DefinitionBuilder;
use common::DoubleTransform;
use common::FailOnBoom;
use common::FixedGate;
use common::VecSource;
use common::minimal_plan;
use common::row;
use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::canonical_json_bytes;
use elspeth_core::core::hashing::hash_bytes;
use elspeth_core::core::identifiers::BranchName;
use elspeth_core::core::identifiers::CoalesceName;
use elspeth_core::core::identifiers::SinkName;
use elspeth_core::core::pipeline::AggregationOutputMode;
use elspeth_core::core::pipeline::AggregationSpec;
use elspeth_core::core::pipeline::CoalescePolicy;
use elspeth_core::core::pipeline::CoalesceSpec;
use elspeth_core::core::pipeline::GatePlan;
use elspeth_core::core::pipeline::MergeStrategy;
use elspeth_core::core::pipeline::RetryPolicy;
use elspeth_core::core::pipeline::RouteTarget;
use elspeth_core::core::pipeline::TransformPlanEntry;
use elspeth_core::core::pipeline::TriggerSpec;
use elspeth_core::core::records::EdgeMode;
use elspeth_core::core::records::QUARANTINE_LABEL;
use elspeth_core::core::records::RunStatus;
use elspeth_core::core::results::ErrorDisposition;
use elspeth_core::core::results::RoutingAction;
use elspeth_core::core::results::SourceItem;
use elspeth_core::core::states::NodeStateStatus;
use elspeth_core::core::states::TokenOutcome;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::runtime::memory::InMemoryRecorder;
use elspeth_core::runtime::orchestrator::Orchestrator;
use elspeth_core::runtime::orchestrator::RunMode;
use serde_json::json;

// ============================================================================
// SECTION: Scenario A: Simple Spine
// ============================================================================

/// source -> double -> default sink over three rows.
#[test]
fn test_simple_spine_doubles_rows() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.transforms.push(TransformPlanEntry {
        label: "double-0".to_string(),
        on_error: ErrorDisposition::Discard,
    });
    let (sink, buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])),
        plan,
    )
    .transform(Box::new(DoubleTransform))
    .sink("out", Box::new(sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.counters.rows_processed, 3);
    assert_eq!(result.counters.rows_succeeded, 3);
    assert_eq!(result.counters.rows_failed, 0);

    let rows = buffer.lock().unwrap().clone();
    assert_eq!(rows, vec![row(json!({"n": 2})), row(json!({"n": 4})), row(json!({"n": 6}))]);

    // Three tokens, each with a source visit and a transform visit.
    assert_eq!(recorder.tokens().len(), 3);
    for token in recorder.tokens() {
        let states: Vec<_> = recorder
            .node_states()
            .into_iter()
            .filter(|state| state.token_id == token.token_id)
            .collect();
        assert!(states.iter().filter(|state| state.step_index == 0).count() <= 1);
    }
    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|outcome| outcome.outcome == TokenOutcome::Completed));

    // The artifact hash is the canonical hash of the written payload.
    let artifacts = recorder.artifacts();
    assert_eq!(artifacts.len(), 1);
    let payload = canonical_json_bytes(&rows).unwrap();
    assert_eq!(artifacts[0].content_hash, hash_bytes(DEFAULT_HASH_ALGORITHM, &payload));
    assert_eq!(result.artifacts.len(), 1);
}

// ============================================================================
// SECTION: Scenario B: Fork / Coalesce Union
// ============================================================================

/// Builds the fork/coalesce plan shared by the fork scenarios.
fn fork_plan() -> elspeth_core::core::pipeline::PipelinePlan {
    let mut plan = minimal_plan("out");
    plan.gates.push(GatePlan {
        name: "fork-gate".to_string(),
        routes: BTreeMap::new(),
        fork_to: vec![BranchName::new("a"), BranchName::new("b")],
    });
    plan.coalesces.push(CoalesceSpec {
        name: CoalesceName::new("join"),
        branches: vec![BranchName::new("a"), BranchName::new("b")],
        policy: CoalescePolicy::RequireAll,
        merge: MergeStrategy::Union,
        timeout_ms: None,
        quorum_count: None,
        select_branch: None,
    });
    plan
}

/// One row forks into two branches that coalesce back into one merged token.
#[test]
fn test_fork_and_coalesce_union() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (sink, buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"k": "x"})])),
        fork_plan(),
    )
    .gate(Box::new(FixedGate {
        gate_name: "fork-gate".to_string(),
        action: RoutingAction::ForkToPaths {
            branches: vec![BranchName::new("a"), BranchName::new("b")],
        },
    }))
    .sink("out", Box::new(sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_forked, 1);
    assert_eq!(result.counters.rows_coalesced, 1);
    assert_eq!(result.counters.rows_succeeded, 0);
    assert_eq!(result.counters.rows_coalesce_failed, 0);

    let rows = buffer.lock().unwrap().clone();
    assert_eq!(rows, vec![row(json!({"k": "x"}))]);

    // Parent FORKED, two children COALESCED, merged token COMPLETED.
    let outcomes = recorder.outcomes();
    let count = |wanted: TokenOutcome| {
        outcomes.iter().filter(|outcome| outcome.outcome == wanted).count()
    };
    assert_eq!(count(TokenOutcome::Forked), 1);
    assert_eq!(count(TokenOutcome::Coalesced), 2);
    assert_eq!(count(TokenOutcome::Completed), 1);

    // Two COPY routing events, one per branch.
    let copies = recorder
        .routing_events()
        .into_iter()
        .filter(|event| event.mode == EdgeMode::Copy)
        .count();
    assert_eq!(copies, 2);
}

/// A branch that never arrives starves require_all; the flush fails it.
#[test]
fn test_fork_with_missing_branch_fails_coalesce() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (sink, buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"k": "x"})])),
        fork_plan(),
    )
    .gate(Box::new(FixedGate {
        gate_name: "fork-gate".to_string(),
        action: RoutingAction::ForkToPaths {
            branches: vec![BranchName::new("a")],
        },
    }))
    .sink("out", Box::new(sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_forked, 1);
    assert_eq!(result.counters.rows_coalesced, 0);
    assert_eq!(result.counters.rows_coalesce_failed, 1);
    assert_eq!(result.counters.rows_failed, 1);
    assert!(buffer.lock().unwrap().is_empty());

    // Nothing vanishes: the parent forked, the lone child failed.
    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 2);
}

// ============================================================================
// SECTION: Scenario D: Source Quarantine
// ============================================================================

/// One valid row completes; one quarantined row diverts with full audit.
#[test]
fn test_source_quarantine_routes_to_sink() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.sinks.push(SinkName::new("quarantine"));
    plan.on_validation_failure = ErrorDisposition::Route(SinkName::new("quarantine"));
    plan.transforms.push(TransformPlanEntry {
        label: "double-0".to_string(),
        on_error: ErrorDisposition::Discard,
    });

    let (out_sink, out_buffer) = CollectSink::new("out");
    let (q_sink, q_buffer) = CollectSink::new("quarantine");
    let source = VecSource::new(vec![
        SourceItem::Valid {
            row: row(json!({"n": 5})),
        },
        SourceItem::Quarantined {
            row: row(json!({"bad": true})),
            error: "bad_field".to_string(),
            destination: ErrorDisposition::Route(SinkName::new("quarantine")),
        },
    ]);
    let definition = DefinitionBuilder::new(Box::new(source), plan)
        .transform(Box::new(DoubleTransform))
        .sink("out", Box::new(out_sink))
        .sink("quarantine", Box::new(q_sink))
        .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_quarantined, 1);
    assert_eq!(result.counters.rows_succeeded, 1);
    assert_eq!(out_buffer.lock().unwrap().clone(), vec![row(json!({"n": 10}))]);
    assert_eq!(q_buffer.lock().unwrap().clone(), vec![row(json!({"bad": true}))]);

    // The quarantined token carries a failed step-0 state and a DIVERT event.
    assert_eq!(recorder.validation_errors().len(), 1);
    let quarantine_edge = recorder
        .edges()
        .into_iter()
        .find(|edge| edge.label == QUARANTINE_LABEL)
        .unwrap();
    assert_eq!(quarantine_edge.default_mode, EdgeMode::Divert);
    let divert_events = recorder
        .routing_events()
        .into_iter()
        .filter(|event| event.edge_id == quarantine_edge.edge_id)
        .count();
    assert_eq!(divert_events, 1);
    let failed_roots = recorder
        .node_states()
        .into_iter()
        .filter(|state| state.step_index == 0 && state.status == NodeStateStatus::Failed)
        .count();
    assert_eq!(failed_roots, 1);
    let quarantined = recorder
        .outcomes()
        .into_iter()
        .filter(|outcome| outcome.outcome == TokenOutcome::Quarantined)
        .count();
    assert_eq!(quarantined, 1);
}

// ============================================================================
// SECTION: Transform Error Routing
// ============================================================================

/// A failing transform diverts its token to the error sink.
#[test]
fn test_transform_error_routes_to_error_sink() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.sinks.push(SinkName::new("errors"));
    plan.transforms.push(TransformPlanEntry {
        label: "fragile-0".to_string(),
        on_error: ErrorDisposition::Route(SinkName::new("errors")),
    });

    let (out_sink, out_buffer) = CollectSink::new("out");
    let (err_sink, err_buffer) = CollectSink::new("errors");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"boom": 1}), json!({"ok": 1})])),
        plan,
    )
    .transform(Box::new(FailOnBoom {
        retryable: false,
    }))
    .sink("out", Box::new(out_sink))
    .sink("errors", Box::new(err_sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_routed, 1);
    assert_eq!(result.counters.rows_succeeded, 1);
    assert_eq!(err_buffer.lock().unwrap().clone(), vec![row(json!({"boom": 1}))]);
    assert_eq!(out_buffer.lock().unwrap().clone(), vec![row(json!({"ok": 1}))]);

    assert_eq!(recorder.transform_errors().len(), 1);
    let divert_edges: Vec<_> = recorder
        .edges()
        .into_iter()
        .filter(|edge| edge.label == "__error_0__")
        .collect();
    assert_eq!(divert_edges.len(), 1);
    let diverted = recorder
        .routing_events()
        .into_iter()
        .filter(|event| event.edge_id == divert_edges[0].edge_id)
        .count();
    assert_eq!(diverted, 1);
}

/// Retryable failures record one node state per attempt before giving up.
#[test]
fn test_retry_records_every_attempt() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.transforms.push(TransformPlanEntry {
        label: "fragile-0".to_string(),
        on_error: ErrorDisposition::Discard,
    });

    let (sink, _buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"boom": 1})])),
        plan,
    )
    .transform(Box::new(FailOnBoom {
        retryable: true,
    }))
    .sink("out", Box::new(sink))
    .retry(RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 0,
        max_delay_ms: 0,
        exponential_base: 2.0,
        jitter: 0.0,
    })
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_failed, 1);
    let attempts: Vec<u32> = recorder
        .node_states()
        .into_iter()
        .filter(|state| state.step_index == 1)
        .map(|state| state.attempt)
        .collect();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.contains(&1) && attempts.contains(&2) && attempts.contains(&3));
}

// ============================================================================
// SECTION: Gate Routing
// ============================================================================

/// A gate can route a token to a named sink with a MOVE event.
#[test]
fn test_gate_routes_to_sink() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.sinks.push(SinkName::new("alt"));
    plan.gates.push(GatePlan {
        name: "router".to_string(),
        routes: BTreeMap::from([("pass".to_string(), RouteTarget::Sink(SinkName::new("alt")))]),
        fork_to: Vec::new(),
    });

    let (out_sink, out_buffer) = CollectSink::new("out");
    let (alt_sink, alt_buffer) = CollectSink::new("alt");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"v": 1})])),
        plan,
    )
    .gate(Box::new(FixedGate {
        gate_name: "router".to_string(),
        action: RoutingAction::RouteToSink {
            sink: SinkName::new("alt"),
        },
    }))
    .sink("out", Box::new(out_sink))
    .sink("alt", Box::new(alt_sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_routed, 1);
    assert!(out_buffer.lock().unwrap().is_empty());
    assert_eq!(alt_buffer.lock().unwrap().len(), 1);
}

/// A gate discard ends the token as FAILED, never silently.
#[test]
fn test_gate_discard_records_failed_outcome() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.gates.push(GatePlan {
        name: "dropper".to_string(),
        routes: BTreeMap::new(),
        fork_to: Vec::new(),
    });

    let (sink, buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"v": 1})])),
        plan,
    )
    .gate(Box::new(FixedGate {
        gate_name: "dropper".to_string(),
        action: RoutingAction::Discard,
    }))
    .sink("out", Box::new(sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_failed, 1);
    assert!(buffer.lock().unwrap().is_empty());
    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].outcome, TokenOutcome::Failed);
}

// ============================================================================
// SECTION: Resume
// ============================================================================

/// Resume skips rows before the cursor and replays recorded rows under
/// fresh root tokens without tripping state uniqueness.
#[test]
fn test_resume_skips_and_replays() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let rows = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];

    // First pass: everything completes.
    let mut plan = minimal_plan("out");
    plan.transforms.push(TransformPlanEntry {
        label: "double-0".to_string(),
        on_error: ErrorDisposition::Discard,
    });
    let (sink, _buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(Box::new(VecSource::valid(rows.clone())), plan.clone())
        .transform(Box::new(DoubleTransform))
        .sink("out", Box::new(sink))
        .build();
    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New).unwrap();
    let first = orchestrator.run().unwrap();
    assert_eq!(first.counters.rows_processed, 3);

    // Second pass resumes the same run: row 0 is done, row 1 replays from
    // its recorded row, row 2 is processed afresh (idempotent row record).
    let recorded_rows = recorder.rows();
    let row_one = recorded_rows.iter().find(|row| row.row_index == 1).unwrap();
    let mut partial = std::collections::BTreeMap::new();
    partial.insert(
        1_u64,
        elspeth_core::core::lineage::RowProgress {
            row_id: row_one.row_id.clone(),
            last_completed_step: 1,
        },
    );
    let state = elspeth_core::core::lineage::ResumeState {
        cursor: 1,
        completed: std::collections::BTreeSet::new(),
        partial,
    };

    let (resumed_sink, resumed_buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(Box::new(VecSource::valid(rows)), plan)
        .transform(Box::new(DoubleTransform))
        .sink("out", Box::new(resumed_sink))
        .build();
    let orchestrator = Orchestrator::new(
        Arc::clone(&recorder) as Arc<dyn Recorder>,
        definition,
        Vec::new(),
        RunMode::Resume {
            run_id: first.run_id.clone(),
            state,
        },
    )
    .unwrap();
    let resumed = orchestrator.run().unwrap();

    assert_eq!(resumed.counters.rows_processed, 2);
    assert_eq!(resumed.counters.rows_succeeded, 2);
    let replayed = resumed_buffer.lock().unwrap().clone();
    assert_eq!(replayed, vec![row(json!({"n": 4})), row(json!({"n": 6}))]);

    // The replayed row now has two root tokens, each with one source visit.
    let roots: Vec<_> = recorder
        .tokens()
        .into_iter()
        .filter(|token| token.row_id == row_one.row_id && token.parent_token_id.is_none())
        .collect();
    assert_eq!(roots.len(), 2);
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Aggregated rows are consumed in batch and flushed as one output row.
#[test]
fn test_aggregation_consumes_and_flushes() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let mut plan = minimal_plan("out");
    plan.transforms.push(TransformPlanEntry {
        label: "double-0".to_string(),
        on_error: ErrorDisposition::Discard,
    });
    plan.aggregations.insert(
        "double-0".to_string(),
        AggregationSpec {
            trigger: TriggerSpec::Count {
                threshold: 2,
            },
            output_mode: AggregationOutputMode::Batch,
        },
    );

    let (sink, buffer) = CollectSink::new("out");
    let definition = DefinitionBuilder::new(
        Box::new(VecSource::valid(vec![json!({"n": 1}), json!({"n": 2})])),
        plan,
    )
    .transform(Box::new(DoubleTransform))
    .sink("out", Box::new(sink))
    .build();

    let orchestrator =
        Orchestrator::new(Arc::clone(&recorder) as Arc<dyn Recorder>, definition, Vec::new(), RunMode::New)
            .unwrap();
    let result = orchestrator.run().unwrap();

    assert_eq!(result.counters.rows_consumed_in_batch, 2);
    assert_eq!(result.counters.rows_succeeded, 0);

    let rows = buffer.lock().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("count").unwrap(), &json!(2));
    assert_eq!(
        rows[0].get("rows").unwrap(),
        &json!([{"n": 2}, {"n": 4}])
    );
}
