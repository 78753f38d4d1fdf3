// crates/elspeth-plugins/src/source.rs
// ============================================================================
// Module: Built-In Sources
// Description: JSON-lines file source and inline static source.
// Purpose: Yield validated rows, quarantining anything that fails the
//          declared schema at the boundary.
// Dependencies: elspeth-core, serde
// ============================================================================

//! ## Overview
//! Sources validate external data at the boundary (Tier 3): malformed JSON
//! and rows missing required fields become quarantined items carrying the
//! configured destination. The engine decides whether quarantined items are
//! recorded or silently dropped; the source only classifies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::PathBuf;

use elspeth_core::core::results::ErrorDisposition;
use elspeth_core::core::results::RowData;
use elspeth_core::core::results::SourceItem;
use elspeth_core::interfaces::plugins::PluginContext;
use elspeth_core::interfaces::plugins::PluginError;
use elspeth_core::interfaces::plugins::SourcePlugin;
use elspeth_core::interfaces::plugins::SourceStream;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Row Validation
// ============================================================================

/// Classifies one raw line into a valid or quarantined item.
fn classify_line(
    line: &str,
    required_fields: &[String],
    destination: &ErrorDisposition,
) -> SourceItem {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(row)) => {
            for field in required_fields {
                if !row.contains_key(field) {
                    return SourceItem::Quarantined {
                        row,
                        error: format!("missing required field '{field}'"),
                        destination: destination.clone(),
                    };
                }
            }
            SourceItem::Valid {
                row,
            }
        }
        Ok(other) => SourceItem::Quarantined {
            row: wrap_raw(json!(other.to_string())),
            error: "row is not a JSON object".to_string(),
            destination: destination.clone(),
        },
        Err(err) => SourceItem::Quarantined {
            row: wrap_raw(json!(line)),
            error: format!("invalid json: {err}"),
            destination: destination.clone(),
        },
    }
}

/// Wraps unparseable input in a `{"raw": ...}` row so it can be preserved.
fn wrap_raw(raw: Value) -> RowData {
    let mut row = RowData::new();
    row.insert("raw".to_string(), raw);
    row
}

// ============================================================================
// SECTION: JSON-Lines Source
// ============================================================================

/// Options for [`JsonLinesSource`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonLinesSourceOptions {
    /// Input file path.
    pub path: PathBuf,
    /// Fields every row must carry.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Source reading one JSON object per line from a file.
pub struct JsonLinesSource {
    /// Parsed options.
    options: JsonLinesSourceOptions,
    /// Destination for rows failing validation.
    on_validation_failure: ErrorDisposition,
}

impl JsonLinesSource {
    /// Builds a JSON-lines source from its options blob.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the options do not parse.
    pub fn from_options(
        options: &Value,
        on_validation_failure: ErrorDisposition,
    ) -> Result<Self, PluginError> {
        let options: JsonLinesSourceOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("json_lines source options: {err}")))?;
        Ok(Self {
            options,
            on_validation_failure,
        })
    }
}

impl SourcePlugin for JsonLinesSource {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn output_schema(&self) -> Value {
        json!({"required_fields": self.options.required_fields})
    }

    fn load(&mut self, _ctx: &PluginContext) -> Result<SourceStream, PluginError> {
        let file = File::open(&self.options.path).map_err(|err| {
            PluginError::Failed(format!("open {}: {err}", self.options.path.display()))
        })?;
        let reader = BufReader::new(file);
        let required = self.options.required_fields.clone();
        let destination = self.on_validation_failure.clone();
        let stream = reader.lines().filter_map(move |line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(classify_line(&line, &required, &destination))),
            Err(err) => Some(Err(PluginError::Failed(format!("read line: {err}")))),
        });
        Ok(Box::new(stream))
    }
}

// ============================================================================
// SECTION: Static Source
// ============================================================================

/// Options for [`StaticSource`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticSourceOptions {
    /// Inline rows yielded in order.
    pub rows: Vec<Value>,
    /// Fields every row must carry.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Source yielding rows inlined in the settings file.
pub struct StaticSource {
    /// Parsed options.
    options: StaticSourceOptions,
    /// Destination for rows failing validation.
    on_validation_failure: ErrorDisposition,
}

impl StaticSource {
    /// Builds a static source from its options blob.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the options do not parse.
    pub fn from_options(
        options: &Value,
        on_validation_failure: ErrorDisposition,
    ) -> Result<Self, PluginError> {
        let options: StaticSourceOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("static source options: {err}")))?;
        Ok(Self {
            options,
            on_validation_failure,
        })
    }
}

impl SourcePlugin for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn output_schema(&self) -> Value {
        json!({"required_fields": self.options.required_fields})
    }

    fn load(&mut self, _ctx: &PluginContext) -> Result<SourceStream, PluginError> {
        let required = self.options.required_fields.clone();
        let destination = self.on_validation_failure.clone();
        let rows = self.options.rows.clone();
        let stream = rows.into_iter().map(move |value| {
            let item = match value {
                Value::Object(row) => {
                    let missing = required.iter().find(|field| !row.contains_key(*field));
                    match missing {
                        Some(field) => SourceItem::Quarantined {
                            row,
                            error: format!("missing required field '{field}'"),
                            destination: destination.clone(),
                        },
                        None => SourceItem::Valid {
                            row,
                        },
                    }
                }
                other => SourceItem::Quarantined {
                    row: wrap_raw(other),
                    error: "row is not a JSON object".to_string(),
                    destination: destination.clone(),
                },
            };
            Ok(item)
        });
        Ok(Box::new(stream))
    }
}
