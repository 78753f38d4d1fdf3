// crates/elspeth-core/tests/pooled_executor.rs
// ============================================================================
// Module: Pooled Executor Tests
// Description: Submission-order output and capacity-retry behavior.
// ============================================================================

//! ## Overview
//! Outputs must match inputs in length and order regardless of completion
//! order, capacity errors must retry under the AIMD budget, and fatal errors
//! must surface in their own slot without disturbing neighbors.

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
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use elspeth_core::core::pipeline::ThrottleConfig;
use elspeth_core::runtime::pool::CallFailure;
use elspeth_core::runtime::pool::PooledExecutor;
use elspeth_core::runtime::retry::AimdThrottle;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds an executor with a zero-delay throttle.
fn executor(pool_size: usize) -> PooledExecutor {
    let config = ThrottleConfig {
        min_dispatch_delay_ms: 0,
        max_dispatch_delay_ms: 50,
        backoff_multiplier: 2.0,
        recovery_step_ms: 10,
        max_capacity_retry_ms: 100,
    };
    PooledExecutor::new(pool_size, Arc::new(AimdThrottle::new(config)))
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// Slower early items must not displace faster late items (submission order).
#[test]
fn test_output_order_is_submission_order() {
    let pool = executor(3);
    let items: Vec<u64> = vec![0, 1, 2, 3, 4];
    let results = pool.execute_batch(&items, |item| {
        // Worker i sleeps (5 - i) ms, so completion order is reversed.
        thread::sleep(Duration::from_millis(5 - item));
        Ok(json!({ "i": item }))
    });
    assert_eq!(results.len(), 5);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &json!({"i": index}));
    }
}

/// Empty batches return empty output.
#[test]
fn test_empty_batch() {
    let pool = executor(4);
    let items: Vec<u64> = Vec::new();
    let results = pool.execute_batch(&items, |_| Ok(()));
    assert!(results.is_empty());
}

/// A fatal failure occupies its own slot; neighbors still succeed.
#[test]
fn test_fatal_failure_is_positional() {
    let pool = executor(2);
    let items: Vec<u64> = vec![0, 1, 2];
    let results = pool.execute_batch(&items, |item| {
        if *item == 1 {
            Err(CallFailure::fatal(json!({"error": "nope"})))
        } else {
            Ok(*item)
        }
    });
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
}

// ============================================================================
// SECTION: Capacity Retry
// ============================================================================

/// Capacity errors retry until success within the budget.
#[test]
fn test_capacity_errors_retry_then_succeed() {
    let pool = executor(1);
    let attempts = AtomicUsize::new(0);
    let items = vec![()];
    let results = pool.execute_batch(&items, |()| {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(CallFailure::capacity(json!({"error": "429"})))
        } else {
            Ok("done")
        }
    });
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap(), &"done");
    assert!(attempts.load(Ordering::SeqCst) >= 3);
}

/// Persistent capacity errors exhaust the wall-clock budget and fail.
#[test]
fn test_capacity_budget_exhaustion() {
    let pool = executor(1);
    let items = vec![()];
    let results = pool.execute_batch(&items, |()| -> Result<(), CallFailure> {
        Err(CallFailure::capacity(json!({"error": "429"})))
    });
    let failure = results[0].as_ref().unwrap_err();
    assert_eq!(failure.kind, elspeth_core::runtime::pool::CallFailureKind::Fatal);
}
