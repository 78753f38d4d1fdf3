// crates/elspeth-core/tests/trigger_evaluator.rs
// ============================================================================
// Module: Trigger Evaluator Tests
// Description: Count, time, and size trigger behavior plus the firing law.
// ============================================================================

//! ## Overview
//! A trigger may only fire when at least one threshold actually holds;
//! spurious firing is a bug. The property test drives random accept/flush
//! interleavings and asserts the implication on every observation.

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

use std::time::Duration;
use std::time::Instant;

use elspeth_core::core::pipeline::TriggerSpec;
use elspeth_core::runtime::triggers::TriggerEvaluator;
use proptest::prelude::*;

// ============================================================================
// SECTION: Count Triggers
// ============================================================================

/// Count triggers fire exactly at the threshold.
#[test]
fn test_count_trigger_fires_at_threshold() {
    let mut evaluator = TriggerEvaluator::new(TriggerSpec::Count {
        threshold: 3,
    });
    let now = Instant::now();
    evaluator.accept(10, now);
    evaluator.accept(10, now);
    assert!(!evaluator.should_trigger(now));
    evaluator.accept(10, now);
    assert!(evaluator.should_trigger(now));
    assert_eq!(evaluator.flush(), 3);
    assert!(!evaluator.should_trigger(now));
}

/// An empty buffer never triggers, whatever the clock says.
#[test]
fn test_empty_buffer_never_triggers() {
    let evaluator = TriggerEvaluator::new(TriggerSpec::Time {
        timeout_ms: 1,
    });
    assert!(!evaluator.should_trigger(Instant::now() + Duration::from_secs(60)));
}

// ============================================================================
// SECTION: Time Triggers
// ============================================================================

/// Time triggers fire once the first-accept age passes the bound.
#[test]
fn test_time_trigger_fires_after_age() {
    let mut evaluator = TriggerEvaluator::new(TriggerSpec::Time {
        timeout_ms: 50,
    });
    let start = Instant::now();
    evaluator.accept(1, start);
    assert!(!evaluator.should_trigger(start + Duration::from_millis(10)));
    assert!(evaluator.should_trigger(start + Duration::from_millis(60)));
}

/// Flush resets the first-accept clock.
#[test]
fn test_flush_resets_age() {
    let mut evaluator = TriggerEvaluator::new(TriggerSpec::Time {
        timeout_ms: 50,
    });
    let start = Instant::now();
    evaluator.accept(1, start);
    let _flushed = evaluator.flush();
    let later = start + Duration::from_millis(100);
    evaluator.accept(1, later);
    assert!(!evaluator.should_trigger(later + Duration::from_millis(10)));
}

// ============================================================================
// SECTION: Size Triggers
// ============================================================================

/// Size triggers fire at the byte threshold.
#[test]
fn test_size_trigger_fires_at_bytes() {
    let mut evaluator = TriggerEvaluator::new(TriggerSpec::Size {
        threshold_bytes: 100,
    });
    let now = Instant::now();
    evaluator.accept(60, now);
    assert!(!evaluator.should_trigger(now));
    evaluator.accept(60, now);
    assert!(evaluator.should_trigger(now));
}

// ============================================================================
// SECTION: Firing Law
// ============================================================================

proptest! {
    /// should_trigger implies count, age, or size reached its threshold, and
    /// buffer_count always equals accepted minus flushed.
    #[test]
    fn prop_trigger_firing_implies_condition(
        threshold in 1_u64 .. 8,
        operations in prop::collection::vec(prop_oneof![
            (1_u64 .. 64).prop_map(Some),
            Just(None),
        ], 1 .. 32)
    ) {
        let mut evaluator = TriggerEvaluator::new(TriggerSpec::Count { threshold });
        let now = Instant::now();
        let mut accepted: u64 = 0;
        let mut flushed: u64 = 0;
        for operation in operations {
            match operation {
                Some(bytes) => {
                    evaluator.accept(bytes, now);
                    accepted += 1;
                }
                None => {
                    flushed += evaluator.flush();
                }
            }
            prop_assert_eq!(evaluator.buffer_count(), accepted - flushed);
            if evaluator.should_trigger(now) {
                prop_assert!(evaluator.buffer_count() >= threshold);
            }
        }
    }
}
