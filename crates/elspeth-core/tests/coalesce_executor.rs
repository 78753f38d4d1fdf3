// crates/elspeth-core/tests/coalesce_executor.rs
// ============================================================================
// Module: Coalesce Executor Tests
// Description: Policy, merge-strategy, loss, timeout, and flush behavior.
// ============================================================================

//! ## Overview
//! Exercises the per-row merge state machine directly: every policy's
//! hold/merge/fail decisions, union and select-branch merges, branch-lost
//! notifications, timeout resolution, and the exhaustion flush. No consumed
//! token may vanish from the resolutions.

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

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use elspeth_core::core::identifiers::BranchName;
use elspeth_core::core::identifiers::CoalesceName;
use elspeth_core::core::identifiers::RowId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::pipeline::CoalescePolicy;
use elspeth_core::core::pipeline::CoalesceSpec;
use elspeth_core::core::pipeline::MergeStrategy;
use elspeth_core::core::results::RowData;
use elspeth_core::core::states::TokenOutcome;
use elspeth_core::runtime::coalesce::CoalesceExecutor;
use elspeth_core::runtime::coalesce::CoalesceResolution;
use elspeth_core::runtime::tokens::Token;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a coalesce spec with the given policy and merge.
fn spec(policy: CoalescePolicy, merge: MergeStrategy) -> CoalesceSpec {
    CoalesceSpec {
        name: CoalesceName::new("merge-point"),
        branches: vec![BranchName::new("a"), BranchName::new("b")],
        policy,
        merge,
        timeout_ms: None,
        quorum_count: None,
        select_branch: None,
    }
}

/// Builds an executor for one spec at step 3.
fn executor(spec: CoalesceSpec) -> CoalesceExecutor {
    let mut steps = BTreeMap::new();
    steps.insert(spec.name.clone(), 3);
    CoalesceExecutor::new(vec![spec], steps)
}

/// Builds a branch child token.
fn child(id: &str, branch: &str, data: Value) -> Token {
    let row = match data {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    };
    Token {
        token_id: TokenId::new(id),
        row_id: RowId::new("row-1"),
        parent_token_id: Some(TokenId::new("parent")),
        branch_name: Some(BranchName::new(branch)),
        row_data: row,
    }
}

/// Shorthand for the coalesce name used throughout.
fn name() -> CoalesceName {
    CoalesceName::new("merge-point")
}

// ============================================================================
// SECTION: Require-All Policy
// ============================================================================

/// First arrival holds; the final arrival merges.
#[test]
fn test_require_all_merges_when_all_arrive() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Union));
    let now = Instant::now();

    let held = exec.accept(&name(), child("t-a", "a", json!({"k": "x", "a_out": 1})), now);
    assert_eq!(held, Some(CoalesceResolution::Held));

    let resolved = exec
        .accept(&name(), child("t-b", "b", json!({"k": "x", "b_out": 2})), now)
        .unwrap();
    let CoalesceResolution::Merged(merged) = resolved else {
        panic!("expected merge, got {resolved:?}");
    };
    assert_eq!(merged.step, 3);
    assert_eq!(merged.contributors.len(), 2);
    assert_eq!(merged.primary_parent, TokenId::new("t-a"));
    let expected: RowData = match json!({"k": "x", "a_out": 1, "b_out": 2}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    assert_eq!(merged.merged_row, expected);
}

/// A lost branch fails the pending merge and surfaces arrived siblings.
#[test]
fn test_require_all_fails_on_branch_loss() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Union));
    let now = Instant::now();

    let held = exec.accept(&name(), child("t-a", "a", json!({"k": "x"})), now);
    assert_eq!(held, Some(CoalesceResolution::Held));

    let resolution = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("b"), "boom", now)
        .unwrap();
    let CoalesceResolution::Failed(failed) = resolution else {
        panic!("expected failure, got {resolution:?}");
    };
    assert_eq!(failed.consumed.len(), 1);
    assert_eq!(failed.consumed[0].token_id, TokenId::new("t-a"));
    assert!(failed.reason.contains("lost branch"));
}

/// A loss before any arrival is remembered; the later arrival is consumed.
#[test]
fn test_require_all_loss_before_arrival() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Union));
    let now = Instant::now();

    let resolution = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("b"), "boom", now)
        .unwrap();
    assert!(matches!(resolution, CoalesceResolution::Failed(_)));

    // The sibling arriving after the failure is consumed as failed.
    let late = exec.accept(&name(), child("t-a", "a", json!({"k": "x"})), now).unwrap();
    let CoalesceResolution::Consumed {
        outcome, ..
    } = late
    else {
        panic!("expected consumed, got {late:?}");
    };
    assert_eq!(outcome, TokenOutcome::Failed);
}

// ============================================================================
// SECTION: Quorum Policy
// ============================================================================

/// Quorum merges as soon as the count is met.
#[test]
fn test_quorum_merges_at_count() {
    let mut quorum_spec = spec(CoalescePolicy::Quorum, MergeStrategy::Union);
    quorum_spec.quorum_count = Some(1);
    let mut exec = executor(quorum_spec);

    let resolved = exec
        .accept(&name(), child("t-a", "a", json!({"k": "x"})), Instant::now())
        .unwrap();
    assert!(matches!(resolved, CoalesceResolution::Merged(_)));
}

/// Quorum fails when the remaining branches cannot reach the count.
#[test]
fn test_quorum_fails_when_unreachable() {
    let mut quorum_spec = spec(CoalescePolicy::Quorum, MergeStrategy::Union);
    quorum_spec.quorum_count = Some(2);
    let mut exec = executor(quorum_spec);
    let now = Instant::now();

    let resolution = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("a"), "gone", now)
        .unwrap();
    assert!(matches!(resolution, CoalesceResolution::Failed(_)));
}

/// A tolerable loss keeps the quorum pending alive.
#[test]
fn test_quorum_tolerates_loss_within_margin() {
    let mut quorum_spec = spec(CoalescePolicy::Quorum, MergeStrategy::Union);
    quorum_spec.branches.push(BranchName::new("c"));
    quorum_spec.quorum_count = Some(2);
    let mut exec = executor(quorum_spec);
    let now = Instant::now();

    let nothing =
        exec.notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("c"), "gone", now);
    assert!(nothing.is_none());

    let held = exec.accept(&name(), child("t-a", "a", json!({"k": 1})), now);
    assert_eq!(held, Some(CoalesceResolution::Held));
    let resolved = exec.accept(&name(), child("t-b", "b", json!({"k": 2})), now).unwrap();
    assert!(matches!(resolved, CoalesceResolution::Merged(_)));
}

// ============================================================================
// SECTION: Best-Effort and First Policies
// ============================================================================

/// Best effort merges whatever arrived once every branch is accounted for.
#[test]
fn test_best_effort_merges_partial_on_loss() {
    let mut exec = executor(spec(CoalescePolicy::BestEffort, MergeStrategy::Union));
    let now = Instant::now();

    let held = exec.accept(&name(), child("t-a", "a", json!({"a_out": 1})), now);
    assert_eq!(held, Some(CoalesceResolution::Held));

    let resolution = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("b"), "gone", now)
        .unwrap();
    let CoalesceResolution::Merged(merged) = resolution else {
        panic!("expected partial merge, got {resolution:?}");
    };
    assert_eq!(merged.contributors.len(), 1);
}

/// Best effort with every branch lost fails rather than merging nothing.
#[test]
fn test_best_effort_fails_when_nothing_arrived() {
    let mut exec = executor(spec(CoalescePolicy::BestEffort, MergeStrategy::Union));
    let now = Instant::now();

    let first =
        exec.notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("a"), "x", now);
    assert!(first.is_none());
    let second = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("b"), "y", now)
        .unwrap();
    assert!(matches!(second, CoalesceResolution::Failed(_)));
}

/// First policy merges immediately and consumes late siblings.
#[test]
fn test_first_policy_consumes_late_arrivals() {
    let mut exec = executor(spec(CoalescePolicy::First, MergeStrategy::Union));
    let now = Instant::now();

    let resolved = exec.accept(&name(), child("t-a", "a", json!({"winner": true})), now).unwrap();
    assert!(matches!(resolved, CoalesceResolution::Merged(_)));

    let late = exec.accept(&name(), child("t-b", "b", json!({"late": true})), now).unwrap();
    let CoalesceResolution::Consumed {
        outcome, ..
    } = late
    else {
        panic!("expected consumed, got {late:?}");
    };
    assert_eq!(outcome, TokenOutcome::Coalesced);
}

// ============================================================================
// SECTION: Merge Strategies
// ============================================================================

/// Union merges nested objects one level deep, last writer wins.
#[test]
fn test_union_merges_nested_one_level() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Union));
    let now = Instant::now();

    let _held =
        exec.accept(&name(), child("t-a", "a", json!({"meta": {"a": 1, "shared": "a"}})), now);
    let resolved = exec
        .accept(&name(), child("t-b", "b", json!({"meta": {"b": 2, "shared": "b"}})), now)
        .unwrap();
    let CoalesceResolution::Merged(merged) = resolved else {
        panic!("expected merge");
    };
    let meta = merged.merged_row.get("meta").unwrap();
    assert_eq!(meta, &json!({"a": 1, "b": 2, "shared": "b"}));
}

/// Select-branch takes the named branch's row verbatim.
#[test]
fn test_select_branch_merge() {
    let mut select_spec = spec(CoalescePolicy::RequireAll, MergeStrategy::SelectBranch);
    select_spec.select_branch = Some(BranchName::new("b"));
    let mut exec = executor(select_spec);
    let now = Instant::now();

    let _held = exec.accept(&name(), child("t-a", "a", json!({"from": "a"})), now);
    let resolved = exec.accept(&name(), child("t-b", "b", json!({"from": "b"})), now).unwrap();
    let CoalesceResolution::Merged(merged) = resolved else {
        panic!("expected merge");
    };
    assert_eq!(merged.merged_row.get("from").unwrap(), &json!("b"));
}

/// Custom merge passes the arrived map through.
#[test]
fn test_custom_merge_passes_branch_map() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Custom));
    let now = Instant::now();

    let _held = exec.accept(&name(), child("t-a", "a", json!({"v": 1})), now);
    let resolved = exec.accept(&name(), child("t-b", "b", json!({"v": 2})), now).unwrap();
    let CoalesceResolution::Merged(merged) = resolved else {
        panic!("expected merge");
    };
    assert_eq!(
        merged.merged_row.get("branches").unwrap(),
        &json!({"a": {"v": 1}, "b": {"v": 2}})
    );
}

// ============================================================================
// SECTION: Timeouts and Flush
// ============================================================================

/// Timeouts resolve pendings per policy once the wait bound passes.
#[test]
fn test_timeout_resolves_best_effort() {
    let mut timeout_spec = spec(CoalescePolicy::BestEffort, MergeStrategy::Union);
    timeout_spec.timeout_ms = Some(5);
    let mut exec = executor(timeout_spec);
    let start = Instant::now();

    let _held = exec.accept(&name(), child("t-a", "a", json!({"v": 1})), start);
    assert!(exec.check_timeouts(start).is_empty());

    let later = start + Duration::from_millis(10);
    let resolutions = exec.check_timeouts(later);
    assert_eq!(resolutions.len(), 1);
    assert!(matches!(resolutions[0], CoalesceResolution::Merged(_)));
    assert!(!exec.has_pending());
}

/// Flush fails a require_all pending with a missing branch.
#[test]
fn test_flush_fails_incomplete_require_all() {
    let mut exec = executor(spec(CoalescePolicy::RequireAll, MergeStrategy::Union));
    let now = Instant::now();

    let _held = exec.accept(&name(), child("t-a", "a", json!({"v": 1})), now);
    let resolutions = exec.flush_pending(now);
    assert_eq!(resolutions.len(), 1);
    let CoalesceResolution::Failed(failed) = &resolutions[0] else {
        panic!("expected failure");
    };
    assert_eq!(failed.consumed.len(), 1);
    assert!(failed.metadata.get("wait_duration_ms").is_some());
}

/// Merge metadata carries arrival order and lost branches.
#[test]
fn test_metadata_blob_contents() {
    let mut best_spec = spec(CoalescePolicy::BestEffort, MergeStrategy::Union);
    best_spec.branches.push(BranchName::new("c"));
    let mut exec = executor(best_spec);
    let now = Instant::now();

    let _held = exec.accept(&name(), child("t-b", "b", json!({"v": 2})), now);
    let _held = exec.accept(&name(), child("t-a", "a", json!({"v": 1})), now);
    let resolution = exec
        .notify_branch_lost(&name(), &RowId::new("row-1"), &BranchName::new("c"), "gone", now)
        .unwrap();
    let CoalesceResolution::Merged(merged) = resolution else {
        panic!("expected merge");
    };
    assert_eq!(merged.metadata.get("arrival_order").unwrap(), &json!(["b", "a"]));
    assert_eq!(merged.metadata.get("lost_branches").unwrap(), &json!({"c": "gone"}));
}
