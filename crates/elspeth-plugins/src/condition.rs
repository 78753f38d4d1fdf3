// crates/elspeth-plugins/src/condition.rs
// ============================================================================
// Module: Gate Condition Evaluation
// Description: Field-path comparator expressions over row JSON.
// Purpose: Give condition gates a small, deterministic predicate language.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! Conditions are `<path> <op> <json literal>` with dot-separated paths, plus
//! the unary forms `exists <path>` and `missing <path>`. Missing fields and
//! type mismatches evaluate to `false`; gates fail closed rather than guess.
//! Numeric ordering compares as `f64` after exact integer comparison.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::results::RowData;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Condition parse errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// Expression does not match the supported grammar.
    #[error("invalid condition: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Comparators
// ============================================================================

/// Supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Equality.
    Equals,
    /// Inequality.
    NotEquals,
    /// Strict greater-than.
    GreaterThan,
    /// Greater-than-or-equal.
    GreaterThanOrEqual,
    /// Strict less-than.
    LessThan,
    /// Less-than-or-equal.
    LessThanOrEqual,
    /// String or array containment.
    Contains,
    /// Field presence.
    Exists,
    /// Field absence.
    NotExists,
}

impl Comparator {
    /// Parses an operator token.
    fn parse(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Self::Equals),
            "!=" => Some(Self::NotEquals),
            ">" => Some(Self::GreaterThan),
            ">=" => Some(Self::GreaterThanOrEqual),
            "<" => Some(Self::LessThan),
            "<=" => Some(Self::LessThanOrEqual),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Condition
// ============================================================================

/// One parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Dot-separated field path.
    path: Vec<String>,
    /// Comparison operator.
    comparator: Comparator,
    /// Expected literal for binary comparators.
    expected: Option<Value>,
    /// Original expression, kept for audit reasons.
    source: String,
}

impl Condition {
    /// Parses a condition expression.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::Invalid`] when the expression does not match
    /// the grammar.
    pub fn parse(raw: &str) -> Result<Self, ConditionError> {
        let trimmed = raw.trim();
        if let Some(path) = trimmed.strip_prefix("exists ") {
            return Ok(Self {
                path: split_path(path)?,
                comparator: Comparator::Exists,
                expected: None,
                source: trimmed.to_string(),
            });
        }
        if let Some(path) = trimmed.strip_prefix("missing ") {
            return Ok(Self {
                path: split_path(path)?,
                comparator: Comparator::NotExists,
                expected: None,
                source: trimmed.to_string(),
            });
        }

        let mut parts = trimmed.splitn(3, char::is_whitespace);
        let path = parts
            .next()
            .ok_or_else(|| ConditionError::Invalid("empty expression".to_string()))?;
        let op = parts
            .next()
            .ok_or_else(|| ConditionError::Invalid(format!("missing operator in '{trimmed}'")))?;
        let literal = parts
            .next()
            .ok_or_else(|| ConditionError::Invalid(format!("missing literal in '{trimmed}'")))?;
        let comparator = Comparator::parse(op)
            .ok_or_else(|| ConditionError::Invalid(format!("unknown operator '{op}'")))?;
        let expected: Value = serde_json::from_str(literal.trim())
            .map_err(|err| ConditionError::Invalid(format!("bad literal '{literal}': {err}")))?;
        Ok(Self {
            path: split_path(path)?,
            comparator,
            expected: Some(expected),
            source: trimmed.to_string(),
        })
    }

    /// Returns the original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the condition against a row. Missing fields are `false`.
    #[must_use]
    pub fn evaluate(&self, row: &RowData) -> bool {
        let value = lookup(row, &self.path);
        match self.comparator {
            Comparator::Exists => value.is_some(),
            Comparator::NotExists => value.is_none(),
            Comparator::Equals => {
                value.is_some_and(|value| Some(value) == self.expected.as_ref())
            }
            Comparator::NotEquals => {
                value.is_some_and(|value| Some(value) != self.expected.as_ref())
            }
            Comparator::GreaterThan
            | Comparator::GreaterThanOrEqual
            | Comparator::LessThan
            | Comparator::LessThanOrEqual => self.compare_numeric(value),
            Comparator::Contains => self.compare_contains(value),
        }
    }

    /// Evaluates numeric ordering comparators.
    fn compare_numeric(&self, value: Option<&Value>) -> bool {
        let (Some(Value::Number(actual)), Some(Value::Number(expected))) =
            (value, self.expected.as_ref())
        else {
            return false;
        };
        if let (Some(actual), Some(expected)) = (actual.as_i64(), expected.as_i64()) {
            return self.apply_ordering(actual.cmp(&expected));
        }
        let (Some(actual), Some(expected)) = (actual.as_f64(), expected.as_f64()) else {
            return false;
        };
        actual
            .partial_cmp(&expected)
            .is_some_and(|ordering| self.apply_ordering(ordering))
    }

    /// Applies the comparator to an ordering result.
    fn apply_ordering(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering;
        match self.comparator {
            Comparator::GreaterThan => ordering == Ordering::Greater,
            Comparator::GreaterThanOrEqual => ordering != Ordering::Less,
            Comparator::LessThan => ordering == Ordering::Less,
            Comparator::LessThanOrEqual => ordering != Ordering::Greater,
            _ => false,
        }
    }

    /// Evaluates string and array containment.
    fn compare_contains(&self, value: Option<&Value>) -> bool {
        let Some(expected) = self.expected.as_ref() else {
            return false;
        };
        match value {
            Some(Value::String(haystack)) => expected
                .as_str()
                .is_some_and(|needle| haystack.contains(needle)),
            Some(Value::Array(items)) => items.contains(expected),
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Splits a dot-separated path, rejecting empty segments.
fn split_path(raw: &str) -> Result<Vec<String>, ConditionError> {
    let segments: Vec<String> = raw.trim().split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(ConditionError::Invalid(format!("bad field path '{raw}'")));
    }
    Ok(segments)
}

/// Looks up a dot path inside a row.
fn lookup<'a>(row: &'a RowData, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = row.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
