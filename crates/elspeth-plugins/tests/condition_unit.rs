// crates/elspeth-plugins/tests/condition_unit.rs
// ============================================================================
// Module: Condition Evaluation Tests
// Description: Grammar, comparators, fail-closed lookups, and panic safety.
// ============================================================================

//! ## Overview
//! Conditions must parse the documented grammar, compare numbers and strings
//! correctly, treat missing fields as `false`, and never panic on arbitrary
//! expression strings.

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

use elspeth_core::core::results::RowData;
use elspeth_plugins::Condition;
use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a row from an object literal.
fn row(value: Value) -> RowData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

// ============================================================================
// SECTION: Grammar
// ============================================================================

/// Binary comparators evaluate against JSON literals.
#[test]
fn test_numeric_comparisons() {
    let data = row(json!({"n": 10}));
    assert!(Condition::parse("n == 10").unwrap().evaluate(&data));
    assert!(Condition::parse("n != 9").unwrap().evaluate(&data));
    assert!(Condition::parse("n > 9").unwrap().evaluate(&data));
    assert!(Condition::parse("n >= 10").unwrap().evaluate(&data));
    assert!(Condition::parse("n < 11").unwrap().evaluate(&data));
    assert!(Condition::parse("n <= 10").unwrap().evaluate(&data));
    assert!(!Condition::parse("n > 10").unwrap().evaluate(&data));
}

/// String equality requires quoted JSON literals.
#[test]
fn test_string_comparison() {
    let data = row(json!({"status": "ok"}));
    assert!(Condition::parse(r#"status == "ok""#).unwrap().evaluate(&data));
    assert!(!Condition::parse(r#"status == "bad""#).unwrap().evaluate(&data));
}

/// Dot paths traverse nested objects.
#[test]
fn test_nested_path_lookup() {
    let data = row(json!({"meta": {"flags": {"active": true}}}));
    assert!(Condition::parse("meta.flags.active == true").unwrap().evaluate(&data));
    assert!(!Condition::parse("meta.flags.missing == true").unwrap().evaluate(&data));
}

/// exists and missing check field presence.
#[test]
fn test_exists_and_missing() {
    let data = row(json!({"present": null}));
    assert!(Condition::parse("exists present").unwrap().evaluate(&data));
    assert!(!Condition::parse("exists absent").unwrap().evaluate(&data));
    assert!(Condition::parse("missing absent").unwrap().evaluate(&data));
}

/// contains works on strings and arrays.
#[test]
fn test_contains() {
    let data = row(json!({"tags": ["a", "b"], "text": "hello world"}));
    assert!(Condition::parse(r#"tags contains "a""#).unwrap().evaluate(&data));
    assert!(!Condition::parse(r#"tags contains "z""#).unwrap().evaluate(&data));
    assert!(Condition::parse(r#"text contains "world""#).unwrap().evaluate(&data));
}

/// Missing fields and type mismatches evaluate false, never error.
#[test]
fn test_fail_closed_on_missing_and_mismatch() {
    let data = row(json!({"s": "text"}));
    assert!(!Condition::parse("ghost > 1").unwrap().evaluate(&data));
    assert!(!Condition::parse("s > 1").unwrap().evaluate(&data));
}

/// Bad grammar is rejected at parse time.
#[test]
fn test_parse_errors() {
    assert!(Condition::parse("").is_err());
    assert!(Condition::parse("lonely").is_err());
    assert!(Condition::parse("a ~~ 1").is_err());
    assert!(Condition::parse("a == not-json").is_err());
    assert!(Condition::parse("a..b == 1").is_err());
}

// ============================================================================
// SECTION: Panic Safety
// ============================================================================

proptest! {
    /// Arbitrary expressions either parse or error; they never panic, and
    /// evaluation over an arbitrary row never panics either.
    #[test]
    fn prop_parse_and_evaluate_never_panic(raw in ".{0,48}", n in any::<i64>()) {
        if let Ok(condition) = Condition::parse(&raw) {
            let data = row(json!({"n": n}));
            let _ = condition.evaluate(&data);
        }
    }
}
