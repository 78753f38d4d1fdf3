// crates/elspeth-plugins/src/transforms.rs
// ============================================================================
// Module: Field Transforms
// Description: Deterministic field-operation transforms over row JSON.
// Purpose: Provide the built-in transform set: set, rename, drop, multiply,
//          and configurable failure injection for error-path pipelines.
// Dependencies: elspeth-core, serde
// ============================================================================

//! ## Overview
//! `FieldTransform` applies a fixed sequence of field operations to each row:
//! literal sets, renames, drops, and numeric multiplies. A `fail_when`
//! condition turns matching rows into data-level errors, which is how
//! pipelines exercise error sinks without a real failing backend.
//! `Passthrough` does nothing, useful as a placeholder spine position.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::results::RowData;
use elspeth_core::core::results::TransformResult;
use elspeth_core::interfaces::plugins::Determinism;
use elspeth_core::interfaces::plugins::PluginContext;
use elspeth_core::interfaces::plugins::TransformPlugin;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::condition::Condition;
use crate::condition::ConditionError;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Options for [`FieldTransform`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldTransformOptions {
    /// Fields set to literal values.
    #[serde(default)]
    pub set: serde_json::Map<String, Value>,
    /// Field renames, old name to new name.
    #[serde(default)]
    pub rename: serde_json::Map<String, Value>,
    /// Fields removed from the row.
    #[serde(default)]
    pub drop: Vec<String>,
    /// Numeric fields multiplied by a factor.
    #[serde(default)]
    pub multiply: serde_json::Map<String, Value>,
    /// Condition turning matching rows into data-level errors.
    #[serde(default)]
    pub fail_when: Option<String>,
    /// Whether injected failures are retryable.
    #[serde(default)]
    pub fail_retryable: bool,
}

// ============================================================================
// SECTION: Field Transform
// ============================================================================

/// Deterministic field-operation transform.
pub struct FieldTransform {
    /// Plugin instance name.
    name: String,
    /// Parsed options.
    options: FieldTransformOptions,
    /// Parsed failure condition.
    fail_when: Option<Condition>,
}

impl FieldTransform {
    /// Builds a field transform from its options blob.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when `fail_when` does not parse.
    pub fn from_options(name: &str, options: &Value) -> Result<Self, ConditionError> {
        let options: FieldTransformOptions = serde_json::from_value(options.clone())
            .map_err(|err| ConditionError::Invalid(format!("field transform options: {err}")))?;
        let fail_when = match &options.fail_when {
            Some(raw) => Some(Condition::parse(raw)?),
            None => None,
        };
        Ok(Self {
            name: name.to_string(),
            options,
            fail_when,
        })
    }
}

impl TransformPlugin for FieldTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext) -> TransformResult {
        if let Some(condition) = &self.fail_when
            && condition.evaluate(&row)
        {
            let detail = json!({
                "error": "row matched fail_when condition",
                "condition": condition.source(),
            });
            return if self.options.fail_retryable {
                TransformResult::retryable_error(detail)
            } else {
                TransformResult::error(detail)
            };
        }

        let mut row = row;
        for (field, value) in &self.options.set {
            row.insert(field.clone(), value.clone());
        }
        for (old, new) in &self.options.rename {
            let Some(new_name) = new.as_str() else {
                return TransformResult::error(json!({
                    "error": "rename target must be a string",
                    "field": old,
                }));
            };
            if let Some(value) = row.remove(old) {
                row.insert(new_name.to_string(), value);
            }
        }
        for field in &self.options.drop {
            row.remove(field);
        }
        for (field, factor) in &self.options.multiply {
            let Some(factor) = factor.as_f64() else {
                return TransformResult::error(json!({
                    "error": "multiply factor must be numeric",
                    "field": field,
                }));
            };
            match row.get(field).and_then(Value::as_f64) {
                Some(current) => {
                    let product = current * factor;
                    // Whole results inside the safe range stay integers so
                    // hashes match integer-only pipelines.
                    #[allow(
                        clippy::cast_possible_truncation,
                        reason = "Guarded by the fract and range checks above."
                    )]
                    let rendered = if product.fract() == 0.0
                        && product.abs() < 9_007_199_254_740_992.0
                    {
                        json!(product as i64)
                    } else {
                        json!(product)
                    };
                    row.insert(field.clone(), rendered);
                }
                None => {
                    return TransformResult::error(json!({
                        "error": "multiply field missing or non-numeric",
                        "field": field,
                    }));
                }
            }
        }
        TransformResult::success(row)
    }
}

// ============================================================================
// SECTION: Passthrough
// ============================================================================

/// Transform that returns rows unchanged.
pub struct Passthrough {
    /// Plugin instance name.
    name: String,
}

impl Passthrough {
    /// Creates a passthrough transform.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl TransformPlugin for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext) -> TransformResult {
        TransformResult::success(row)
    }
}
