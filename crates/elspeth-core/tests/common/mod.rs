// crates/elspeth-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Support
// Description: Minimal plugin implementations for engine tests.
// Purpose: Drive the orchestrator end to end without the plugins crate.
// ============================================================================

//! ## Overview
//! Tiny plugins for exercising the engine: a vec-backed source, a doubling
//! transform, a failure-injecting transform, a scripted gate, and a
//! collecting sink whose artifact hash follows the database-sink discipline.

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
    dead_code,
    reason = "Test-only helpers are permitted and not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::canonical_json_bytes;
use elspeth_core::core::hashing::hash_bytes;
use elspeth_core::core::identifiers::SinkName;
use elspeth_core::core::pipeline::CheckpointConfig;
use elspeth_core::core::pipeline::ConcurrencyConfig;
use elspeth_core::core::pipeline::PipelinePlan;
use elspeth_core::core::pipeline::RetryPolicy;
use elspeth_core::core::pipeline::TelemetryRuntimeConfig;
use elspeth_core::core::pipeline::ThrottleConfig;
use elspeth_core::core::results::ErrorDisposition;
use elspeth_core::core::results::GateResult;
use elspeth_core::core::results::RoutingAction;
use elspeth_core::core::results::RowData;
use elspeth_core::core::results::SourceItem;
use elspeth_core::core::results::TransformResult;
use elspeth_core::core::states::ArtifactDescriptor;
use elspeth_core::interfaces::plugins::Determinism;
use elspeth_core::interfaces::plugins::GatePlugin;
use elspeth_core::interfaces::plugins::PluginContext;
use elspeth_core::interfaces::plugins::PluginError;
use elspeth_core::interfaces::plugins::SinkPlugin;
use elspeth_core::interfaces::plugins::SourcePlugin;
use elspeth_core::interfaces::plugins::SourceStream;
use elspeth_core::interfaces::plugins::TransformPlugin;
use elspeth_core::runtime::orchestrator::PipelineDefinition;
use elspeth_core::runtime::orchestrator::SinkBinding;
use elspeth_core::runtime::orchestrator::TransformBinding;
use serde_json::Value;
use serde_json::json;

/// Builds a row from a JSON object literal.
pub fn row(value: Value) -> RowData {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object literal, got {other}"),
    }
}

/// Source yielding a fixed list of items.
pub struct VecSource {
    items: Vec<SourceItem>,
}

impl VecSource {
    pub fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
        }
    }

    pub fn valid(rows: Vec<Value>) -> Self {
        Self::new(
            rows.into_iter()
                .map(|value| SourceItem::Valid {
                    row: row(value),
                })
                .collect(),
        )
    }
}

impl SourcePlugin for VecSource {
    fn name(&self) -> &str {
        "vec-source"
    }

    fn plugin_version(&self) -> &str {
        "test"
    }

    fn load(&mut self, _ctx: &PluginContext) -> Result<SourceStream, PluginError> {
        let items: Vec<_> = self.items.drain(..).map(Ok).collect();
        Ok(Box::new(items.into_iter()))
    }
}

/// Transform doubling the numeric field `n`.
pub struct DoubleTransform;

impl TransformPlugin for DoubleTransform {
    fn name(&self) -> &str {
        "double"
    }

    fn plugin_version(&self) -> &str {
        "test"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, mut row: RowData, _ctx: &PluginContext) -> TransformResult {
        match row.get("n").and_then(Value::as_i64) {
            Some(n) => {
                row.insert("n".to_string(), json!(n * 2));
                TransformResult::success(row)
            }
            None => TransformResult::error(json!({"error": "field n missing"})),
        }
    }
}

/// Transform failing rows that carry a `boom` field.
pub struct FailOnBoom {
    pub retryable: bool,
}

impl TransformPlugin for FailOnBoom {
    fn name(&self) -> &str {
        "fail-on-boom"
    }

    fn plugin_version(&self) -> &str {
        "test"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext) -> TransformResult {
        if row.contains_key("boom") {
            let detail = json!({"error": "boom"});
            if self.retryable {
                TransformResult::retryable_error(detail)
            } else {
                TransformResult::error(detail)
            }
        } else {
            TransformResult::success(row)
        }
    }
}

/// Gate returning a fixed routing action for every row.
pub struct FixedGate {
    pub gate_name: String,
    pub action: RoutingAction,
}

impl GatePlugin for FixedGate {
    fn name(&self) -> &str {
        &self.gate_name
    }

    fn plugin_version(&self) -> &str {
        "test"
    }

    fn evaluate(&mut self, _row: &RowData, _ctx: &PluginContext) -> Result<GateResult, PluginError> {
        Ok(GateResult {
            action: self.action.clone(),
            reason: json!({"gate": self.gate_name}),
        })
    }
}

/// Shared buffer of rows a [`CollectSink`] received.
pub type SinkBuffer = Arc<Mutex<Vec<RowData>>>;

/// Sink collecting rows in memory; hashes the canonical payload.
pub struct CollectSink {
    sink_name: String,
    buffer: SinkBuffer,
}

impl CollectSink {
    pub fn new(name: &str) -> (Self, SinkBuffer) {
        let buffer: SinkBuffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sink_name: name.to_string(),
                buffer: Arc::clone(&buffer),
            },
            buffer,
        )
    }
}

impl SinkPlugin for CollectSink {
    fn name(&self) -> &str {
        &self.sink_name
    }

    fn plugin_version(&self) -> &str {
        "test"
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError> {
        let payload = canonical_json_bytes(&rows.to_vec())
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        let content_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &payload);
        self.buffer.lock().unwrap().extend(rows.iter().cloned());
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            path_or_uri: format!("memory://{}", self.sink_name),
            size_bytes: payload.len() as u64,
            content_hash,
            metadata: Some(json!({"rows": rows.len()})),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Builds a pipeline definition with sensible test defaults.
pub struct DefinitionBuilder {
    pub source: Box<dyn SourcePlugin>,
    pub transforms: Vec<TransformBinding>,
    pub gates: Vec<Box<dyn GatePlugin>>,
    pub sinks: BTreeMap<SinkName, SinkBinding>,
    pub plan: PipelinePlan,
    pub telemetry: TelemetryRuntimeConfig,
    pub retry: RetryPolicy,
}

impl DefinitionBuilder {
    pub fn new(source: Box<dyn SourcePlugin>, plan: PipelinePlan) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            gates: Vec::new(),
            sinks: BTreeMap::new(),
            plan,
            telemetry: TelemetryRuntimeConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn transform(mut self, plugin: Box<dyn TransformPlugin>) -> Self {
        self.transforms.push(TransformBinding {
            plugin,
            options: Value::Null,
        });
        self
    }

    pub fn gate(mut self, plugin: Box<dyn GatePlugin>) -> Self {
        self.gates.push(plugin);
        self
    }

    pub fn sink(mut self, name: &str, plugin: Box<dyn SinkPlugin>) -> Self {
        self.sinks.insert(
            SinkName::new(name),
            SinkBinding {
                plugin,
                options: Value::Null,
                flush_threshold: 1_000,
            },
        );
        self
    }

    pub fn build(self) -> PipelineDefinition {
        PipelineDefinition {
            source: self.source,
            source_options: Value::Null,
            transforms: self.transforms,
            gates: self.gates,
            sinks: self.sinks,
            plan: self.plan,
            retry: self.retry,
            throttle: ThrottleConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            telemetry: self.telemetry,
            checkpoint: CheckpointConfig::default(),
            canonical_version: "jcs-sha256-v1".to_string(),
            settings_snapshot: json!({"test": true}),
        }
    }
}

/// Builds a plan with one default sink and no transforms or gates.
pub fn minimal_plan(default_sink: &str) -> PipelinePlan {
    PipelinePlan {
        transforms: Vec::new(),
        gates: Vec::new(),
        coalesces: Vec::new(),
        aggregations: BTreeMap::new(),
        sinks: vec![SinkName::new(default_sink)],
        default_sink: SinkName::new(default_sink),
        on_validation_failure: ErrorDisposition::Discard,
    }
}
