// crates/elspeth-core/src/runtime/orchestrator.rs
// ============================================================================
// Module: ELSPETH Orchestrator
// Description: Run owner: registration, main loop, sink batching, finalize.
// Purpose: Drive one pipeline run end to end with exactly-once disposition
//          recording and a sink durability boundary.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! The orchestrator begins the run, registers the graph, runs lifecycle
//! hooks, iterates the source, drives the processor per row, sweeps
//! aggregation triggers and coalesce timeouts between rows, and batches
//! sink writes. Sinks are the durability boundary: a sink-bound token's
//! terminal outcome is recorded only after its batch was written and its
//! artifact persisted. The run is finalized on every exit path, and
//! `on_complete` hooks run on failure paths too.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::core::identifiers::CoalesceName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::TokenId;
use crate::core::lineage::ResumeState;
use crate::core::pipeline::CheckpointConfig;
use crate::core::pipeline::ConcurrencyConfig;
use crate::core::pipeline::PipelinePlan;
use crate::core::pipeline::RetryPolicy;
use crate::core::pipeline::TelemetryRuntimeConfig;
use crate::core::pipeline::ThrottleConfig;
use crate::core::records::NodeType;
use crate::core::records::RunStatus;
use crate::core::results::ErrorDisposition;
use crate::core::results::RowData;
use crate::core::results::RowResult;
use crate::core::results::SourceItem;
use crate::core::states::NodeStateStatus;
use crate::core::states::SinkArtifactRecord;
use crate::core::states::TokenOutcome;
use crate::interfaces::plugins::GatePlugin;
use crate::interfaces::plugins::PluginContext;
use crate::interfaces::plugins::SinkPlugin;
use crate::interfaces::plugins::SourcePlugin;
use crate::interfaces::plugins::TransformPlugin;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::telemetry::TelemetryEvent;
use crate::interfaces::telemetry::TelemetryExporter;
use crate::interfaces::telemetry::TelemetrySender;
use crate::runtime::coalesce::CoalesceExecutor;
use crate::runtime::error::EngineError;
use crate::runtime::graph::ExecutionGraph;
use crate::runtime::graph::GraphNodeIds;
use crate::runtime::pool::PooledExecutor;
use crate::runtime::processor::AggregationFlush;
use crate::runtime::processor::AggregationRuntime;
use crate::runtime::processor::GateRuntime;
use crate::runtime::processor::RowProcessor;
use crate::runtime::processor::TransformRuntime;
use crate::runtime::retry::AimdThrottle;
use crate::runtime::retry::RetryManager;
use crate::runtime::telemetry::TelemetryHealth;
use crate::runtime::telemetry::TelemetryManager;
use crate::runtime::tokens::TokenManager;
use crate::runtime::triggers::TriggerEvaluator;

// ============================================================================
// SECTION: Pipeline Definition
// ============================================================================

/// One spine transform plugin with its configuration options.
pub struct TransformBinding {
    /// Transform plugin instance.
    pub plugin: Box<dyn TransformPlugin>,
    /// Plugin configuration options.
    pub options: Value,
}

/// One sink plugin with its configuration options and flush threshold.
pub struct SinkBinding {
    /// Sink plugin instance.
    pub plugin: Box<dyn SinkPlugin>,
    /// Plugin configuration options.
    pub options: Value,
    /// Pending-batch flush threshold in rows.
    pub flush_threshold: usize,
}

/// Everything the orchestrator needs to own a run: plugin instances bound to
/// a validated structural plan plus the runtime configuration records.
pub struct PipelineDefinition {
    /// Source plugin instance.
    pub source: Box<dyn SourcePlugin>,
    /// Source plugin configuration options.
    pub source_options: Value,
    /// Transforms aligned with `plan.transforms`.
    pub transforms: Vec<TransformBinding>,
    /// Gates aligned with `plan.gates`.
    pub gates: Vec<Box<dyn GatePlugin>>,
    /// Sinks by name.
    pub sinks: BTreeMap<SinkName, SinkBinding>,
    /// Structural pipeline plan.
    pub plan: PipelinePlan,
    /// Retry policy for retryable transform faults.
    pub retry: RetryPolicy,
    /// AIMD throttle configuration for pooled external calls.
    pub throttle: ThrottleConfig,
    /// Worker-pool sizing for pooled external calls.
    pub concurrency: ConcurrencyConfig,
    /// Telemetry runtime configuration.
    pub telemetry: TelemetryRuntimeConfig,
    /// Checkpoint configuration (consumed by the resume path).
    pub checkpoint: CheckpointConfig,
    /// Canonicalization scheme version tag for the run record.
    pub canonical_version: String,
    /// Effective configuration snapshot hashed into the run record.
    pub settings_snapshot: Value,
}

/// How the orchestrator acquires its run identity.
pub enum RunMode {
    /// Start a new run.
    New,
    /// Resume a previously interrupted run.
    Resume {
        /// Identifier of the run being resumed.
        run_id: RunId,
        /// Cursor and per-row progress reconstructed from the Landscape.
        state: ResumeState,
    },
}

// ============================================================================
// SECTION: Counters and Results
// ============================================================================

/// Terminal accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Source items observed (valid and quarantined).
    pub rows_processed: u64,
    /// Root tokens that completed to the default sink.
    pub rows_succeeded: u64,
    /// Tokens that failed without reaching a sink.
    pub rows_failed: u64,
    /// Tokens routed to a named sink.
    pub rows_routed: u64,
    /// Rows quarantined at the source boundary.
    pub rows_quarantined: u64,
    /// Tokens that forked.
    pub rows_forked: u64,
    /// Successful coalesce merges.
    pub rows_coalesced: u64,
    /// Failed coalesce resolutions.
    pub rows_coalesce_failed: u64,
    /// Tokens absorbed into aggregation buffers.
    pub rows_consumed_in_batch: u64,
}

/// Final report of one run.
#[derive(Debug)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: RunId,
    /// Terminal run status.
    pub status: RunStatus,
    /// Terminal counters.
    pub counters: RunCounters,
    /// Artifacts written by sinks, in write order.
    pub artifacts: Vec<SinkArtifactRecord>,
    /// Final telemetry health, when telemetry was enabled.
    pub telemetry: Option<TelemetryHealth>,
}

// ============================================================================
// SECTION: Sink Runtime
// ============================================================================

/// One pending row awaiting a sink flush.
struct PendingSinkRow {
    /// Token whose outcome is deferred to the flush; `None` for aggregation
    /// output rows, which have no token of their own.
    token: Option<(TokenId, TokenOutcome, Option<Value>)>,
    /// Row payload to write.
    row: RowData,
}

/// One sink bound to its node, context, and pending batch.
struct SinkRuntime {
    /// Sink plugin instance.
    plugin: Box<dyn SinkPlugin>,
    /// Registered node identifier.
    node_id: NodeId,
    /// Base plugin context (state unset).
    context: PluginContext,
    /// Rows awaiting the next flush.
    pending: Vec<PendingSinkRow>,
    /// Flush threshold in rows.
    flush_threshold: usize,
    /// Anchor token fallback for batches without row tokens.
    anchor_fallback: Option<TokenId>,
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Owner of one pipeline run.
pub struct Orchestrator {
    /// Shared recorder handle.
    recorder: Arc<dyn Recorder>,
    /// Run identifier.
    run_id: RunId,
    /// Source plugin instance.
    source: Box<dyn SourcePlugin>,
    /// Source plugin context.
    source_ctx: PluginContext,
    /// Row processor.
    processor: RowProcessor,
    /// Sinks by name.
    sinks: BTreeMap<SinkName, SinkRuntime>,
    /// Default sink name.
    default_sink: SinkName,
    /// Sink-write step index (one past the spine).
    sink_step: u32,
    /// Shared execution graph.
    graph: Arc<ExecutionGraph>,
    /// Telemetry manager, when enabled.
    telemetry: Option<TelemetryManager>,
    /// Telemetry emit handle.
    telemetry_sender: Option<TelemetrySender>,
    /// Whether total exporter failure fails the run.
    fail_on_total_exporter_failure: bool,
    /// Pooled executor available to batch-capable plugins.
    pool: Arc<PooledExecutor>,
    /// Resume state, when resuming.
    resume: Option<ResumeState>,
    /// Checkpoint configuration.
    checkpoint: CheckpointConfig,
    /// Terminal counters.
    counters: RunCounters,
    /// Artifacts written so far.
    artifacts: Vec<SinkArtifactRecord>,
}

impl Orchestrator {
    /// Builds an orchestrator: validates configuration (Tier 2), begins the
    /// run, registers the graph, and wires every sub-component.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Plan`] or [`EngineError::Graph`] for invalid
    /// configuration before any side effect, and [`EngineError::Recorder`]
    /// when registration writes fail.
    pub fn new(
        recorder: Arc<dyn Recorder>,
        definition: PipelineDefinition,
        exporters: Vec<Box<dyn TelemetryExporter>>,
        mode: RunMode,
    ) -> Result<Self, EngineError> {
        let PipelineDefinition {
            source,
            source_options,
            transforms,
            gates,
            sinks,
            plan,
            retry,
            throttle,
            concurrency,
            telemetry,
            checkpoint,
            canonical_version,
            settings_snapshot,
        } = definition;

        // Tier 2: validate everything before the first side effect.
        let coalesce_gate_index = plan.validate()?;
        retry.validate()?;
        throttle.validate()?;
        concurrency.validate()?;
        if transforms.len() != plan.transforms.len() {
            return Err(EngineError::Invariant(
                "transform plugins and plan entries are misaligned".to_string(),
            ));
        }
        if gates.len() != plan.gates.len() {
            return Err(EngineError::Invariant(
                "gate plugins and plan entries are misaligned".to_string(),
            ));
        }

        let (run_id, resume) = match mode {
            RunMode::New => {
                let run = recorder.begin_run(&settings_snapshot, &canonical_version)?;
                (run.run_id, None)
            }
            RunMode::Resume {
                run_id,
                state,
            } => (run_id, Some(state)),
        };

        // Telemetry comes up right after the run record exists.
        let (telemetry_manager, telemetry_sender) = if telemetry.enabled {
            let manager = TelemetryManager::new(telemetry.clone(), exporters);
            let sender = manager.sender();
            (Some(manager), Some(sender))
        } else {
            (None, None)
        };
        if let Some(sender) = &telemetry_sender {
            sender.emit(TelemetryEvent::RunStarted {
                run_id: run_id.clone(),
                started_at: crate::core::time::Timestamp::now(),
            });
        }

        // Register every node.
        let source_node = recorder
            .register_node(
                &run_id,
                source.name(),
                source.plugin_version(),
                NodeType::Source,
                &source_options,
                &source.output_schema(),
            )?
            .node_id;
        let mut transform_nodes = Vec::with_capacity(transforms.len());
        for (binding, entry) in transforms.iter().zip(&plan.transforms) {
            let schema = json!({
                "input": binding.plugin.input_schema(),
                "output": binding.plugin.output_schema(),
            });
            let node = recorder.register_node(
                &run_id,
                binding.plugin.name(),
                binding.plugin.plugin_version(),
                NodeType::Transform,
                &binding.options,
                &schema,
            )?;
            debug!(label = %entry.label, node = %node.node_id, "registered transform");
            transform_nodes.push(node.node_id);
        }
        let mut gate_nodes = Vec::with_capacity(gates.len());
        for (plugin, gate_plan) in gates.iter().zip(&plan.gates) {
            let config = json!({
                "routes": gate_plan.routes,
                "fork_to": gate_plan.fork_to,
            });
            let node = recorder.register_node(
                &run_id,
                plugin.name(),
                plugin.plugin_version(),
                NodeType::Gate,
                &config,
                &Value::Null,
            )?;
            gate_nodes.push(node.node_id);
        }
        let mut coalesce_nodes = BTreeMap::new();
        for coalesce in &plan.coalesces {
            let config = serde_json::to_value(coalesce)
                .map_err(|err| EngineError::Invariant(err.to_string()))?;
            let node = recorder.register_node(
                &run_id,
                "coalesce",
                env!("CARGO_PKG_VERSION"),
                NodeType::Coalesce,
                &config,
                &Value::Null,
            )?;
            coalesce_nodes.insert(coalesce.name.clone(), node.node_id);
        }
        let mut aggregation_nodes = BTreeMap::new();
        for (label, spec) in &plan.aggregations {
            let config =
                serde_json::to_value(spec).map_err(|err| EngineError::Invariant(err.to_string()))?;
            let node = recorder.register_node(
                &run_id,
                "aggregation",
                env!("CARGO_PKG_VERSION"),
                NodeType::Aggregation,
                &config,
                &Value::Null,
            )?;
            aggregation_nodes.insert(label.clone(), node.node_id);
        }
        let mut sink_nodes = BTreeMap::new();
        let sink_bindings = sinks;
        for (name, binding) in &sink_bindings {
            let node = recorder.register_node(
                &run_id,
                binding.plugin.name(),
                binding.plugin.plugin_version(),
                NodeType::Sink,
                &binding.options,
                &Value::Null,
            )?;
            sink_nodes.insert(name.clone(), node.node_id);
        }

        let ids = GraphNodeIds {
            source: source_node.clone(),
            transforms: transform_nodes.clone(),
            gates: gate_nodes.clone(),
            coalesces: coalesce_nodes,
            aggregations: aggregation_nodes.clone(),
            sinks: sink_nodes.clone(),
        };
        let graph = Arc::new(ExecutionGraph::build(recorder.as_ref(), &run_id, &plan, &ids)?);

        // Coalesce steps: T + producing-gate index + 1.
        let transform_count = u32::try_from(plan.transforms.len())
            .map_err(|_| EngineError::Invariant("transform count overflow".to_string()))?;
        let gate_count = u32::try_from(plan.gates.len())
            .map_err(|_| EngineError::Invariant("gate count overflow".to_string()))?;
        let mut coalesce_steps: BTreeMap<CoalesceName, u32> = BTreeMap::new();
        for (name, gate_index) in &coalesce_gate_index {
            let gate_index = u32::try_from(*gate_index)
                .map_err(|_| EngineError::Invariant("gate index overflow".to_string()))?;
            coalesce_steps.insert(name.clone(), transform_count + gate_index + 1);
        }

        let throttle = Arc::new(AimdThrottle::new(throttle));
        let pool = Arc::new(PooledExecutor::new(concurrency.max_workers, Arc::clone(&throttle)));

        // Wire runtime bindings.
        let mut transform_runtimes = Vec::with_capacity(transforms.len());
        for (index, (binding, entry)) in transforms.into_iter().zip(&plan.transforms).enumerate() {
            let node_id = transform_nodes
                .get(index)
                .cloned()
                .ok_or_else(|| EngineError::Invariant("transform node missing".to_string()))?;
            let context = PluginContext::new(
                run_id.clone(),
                node_id.clone(),
                binding.options.clone(),
                Arc::clone(&recorder),
                telemetry_sender.clone(),
            );
            let spine_step = u32::try_from(index + 1)
                .map_err(|_| EngineError::Invariant("transform step overflow".to_string()))?;
            let aggregation = plan.aggregations.get(&entry.label).map(|spec| {
                AggregationRuntime {
                    node_id: aggregation_nodes
                        .get(&entry.label)
                        .cloned()
                        .unwrap_or_else(|| node_id.clone()),
                    spec: spec.clone(),
                    spine_step,
                    evaluator: TriggerEvaluator::new(spec.trigger),
                    buffered: Vec::new(),
                    buffered_tokens: Vec::new(),
                }
            });
            transform_runtimes.push(TransformRuntime {
                plugin: binding.plugin,
                on_error: entry.on_error.clone(),
                node_id,
                label: entry.label.clone(),
                context,
                aggregation,
            });
        }
        let mut gate_runtimes = Vec::with_capacity(gates.len());
        for (index, (plugin, gate_plan)) in gates.into_iter().zip(plan.gates.iter()).enumerate() {
            let node_id = gate_nodes
                .get(index)
                .cloned()
                .ok_or_else(|| EngineError::Invariant("gate node missing".to_string()))?;
            let context = PluginContext::new(
                run_id.clone(),
                node_id.clone(),
                Value::Null,
                Arc::clone(&recorder),
                telemetry_sender.clone(),
            );
            gate_runtimes.push(GateRuntime {
                plugin,
                plan: gate_plan.clone(),
                node_id,
                context,
            });
        }
        let mut sink_runtimes = BTreeMap::new();
        for (name, binding) in sink_bindings {
            let node_id = sink_nodes
                .get(&name)
                .cloned()
                .ok_or_else(|| EngineError::Invariant("sink node missing".to_string()))?;
            let context = PluginContext::new(
                run_id.clone(),
                node_id.clone(),
                binding.options.clone(),
                Arc::clone(&recorder),
                telemetry_sender.clone(),
            );
            sink_runtimes.insert(
                name,
                SinkRuntime {
                    plugin: binding.plugin,
                    node_id,
                    context,
                    pending: Vec::new(),
                    flush_threshold: binding.flush_threshold,
                    anchor_fallback: None,
                },
            );
        }

        let source_ctx = PluginContext::new(
            run_id.clone(),
            source_node.clone(),
            source_options,
            Arc::clone(&recorder),
            telemetry_sender.clone(),
        );

        let coalesce =
            CoalesceExecutor::new(plan.coalesces.clone(), coalesce_steps);
        let tokens = TokenManager::new(Arc::clone(&recorder));
        let processor = RowProcessor::new(
            run_id.clone(),
            Arc::clone(&recorder),
            Arc::clone(&graph),
            source_node,
            transform_runtimes,
            gate_runtimes,
            tokens,
            coalesce,
            RetryManager::new(retry),
            plan.default_sink.clone(),
        );

        Ok(Self {
            recorder,
            run_id,
            source,
            source_ctx,
            processor,
            sinks: sink_runtimes,
            default_sink: plan.default_sink.clone(),
            sink_step: transform_count + gate_count + 1,
            graph,
            telemetry: telemetry_manager,
            telemetry_sender,
            fail_on_total_exporter_failure: telemetry.fail_on_total_exporter_failure,
            pool,
            resume,
            checkpoint,
            counters: RunCounters::default(),
            artifacts: Vec::new(),
        })
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Returns the shared execution graph.
    #[must_use]
    pub fn graph(&self) -> Arc<ExecutionGraph> {
        Arc::clone(&self.graph)
    }

    /// Returns the pooled executor shared with batch-capable plugins.
    #[must_use]
    pub fn pool(&self) -> Arc<PooledExecutor> {
        Arc::clone(&self.pool)
    }

    /// Executes the run to completion and finalizes it on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the engine error that failed the run; the run record is
    /// finalized as `Failed` before the error is returned.
    pub fn run(mut self) -> Result<RunResult, EngineError> {
        let outcome = self.execute();
        self.call_complete_hooks();
        self.close_sinks();

        let telemetry_ok = self.telemetry_total_failure_check();
        let status = match (&outcome, telemetry_ok) {
            (Ok(()), true) => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        let finalize_result = self.recorder.finalize_run(&self.run_id, status);
        if finalize_result.is_ok()
            && let Some(sender) = &self.telemetry_sender
        {
            sender.emit(TelemetryEvent::RunCompleted {
                run_id: self.run_id.clone(),
                status,
                rows_processed: self.counters.rows_processed,
                completed_at: crate::core::time::Timestamp::now(),
            });
        }
        let health = self.telemetry.take().map(|mut manager| manager.close());

        outcome?;
        finalize_result?;
        if !telemetry_ok {
            return Err(EngineError::Invariant(
                "telemetry: every exporter failed and fail_on_total_exporter_failure is set"
                    .to_string(),
            ));
        }
        Ok(RunResult {
            run_id: self.run_id.clone(),
            status,
            counters: self.counters,
            artifacts: std::mem::take(&mut self.artifacts),
            telemetry: health,
        })
    }

    /// Main loop: hooks, source iteration, sweeps, exhaustion, sink drain.
    fn execute(&mut self) -> Result<(), EngineError> {
        self.call_start_hooks()?;

        let stream = self
            .source
            .load(&self.source_ctx)
            .map_err(|err| EngineError::Source(err.to_string()))?;
        let mut row_index: u64 = 0;
        for item in stream {
            let item = item.map_err(|err| EngineError::Source(err.to_string()))?;
            self.handle_source_item(row_index, item)?;
            row_index += 1;
            if self.checkpoint.enabled
                && self.checkpoint.frequency > 0
                && row_index % self.checkpoint.frequency == 0
            {
                debug!(row_index, "checkpoint boundary");
            }

            let now = Instant::now();
            let flushes = self.processor.sweep_aggregation_triggers(now)?;
            self.apply_aggregation_flushes(flushes);
            let timeout_results = self.processor.sweep_coalesce_timeouts(now)?;
            self.apply_results(timeout_results)?;
            self.flush_full_sinks()?;
        }

        // Source exhausted: force every buffer and pending merge to resolve.
        let flushes = self.processor.flush_aggregations()?;
        self.apply_aggregation_flushes(flushes);
        let results = self.processor.flush_coalesce_pending()?;
        self.apply_results(results)?;
        self.drain_all_sinks()?;

        let (merges, failures) = self.processor.coalesce_stats();
        self.counters.rows_coalesced = merges;
        self.counters.rows_coalesce_failed = failures;
        Ok(())
    }

    /// Routes one source item through skip, replay, quarantine, or process.
    fn handle_source_item(&mut self, row_index: u64, item: SourceItem) -> Result<(), EngineError> {
        let replay = match &self.resume {
            Some(resume)
                if row_index < resume.cursor || resume.completed.contains(&row_index) =>
            {
                return Ok(());
            }
            Some(resume) => resume.partial.get(&row_index).cloned(),
            None => None,
        };
        match item {
            SourceItem::Valid {
                row,
            } => {
                self.counters.rows_processed += 1;
                let results = if let Some(progress) = replay {
                    self.processor.process_existing_row(
                        &progress.row_id,
                        row,
                        progress.last_completed_step,
                    )?
                } else {
                    self.processor.process_row(row_index, row)?
                };
                self.apply_results(results)
            }
            SourceItem::Quarantined {
                row,
                error,
                destination,
            } => {
                self.counters.rows_processed += 1;
                match destination {
                    ErrorDisposition::Discard => {
                        debug!(row_index, %error, "quarantined row discarded at source");
                        Ok(())
                    }
                    ErrorDisposition::Route(sink) => {
                        let result =
                            self.processor.quarantine_row(row_index, row, &error, &sink)?;
                        self.counters.rows_quarantined += 1;
                        self.apply_results(vec![result])
                    }
                }
            }
        }
    }

    /// Accumulates counters and dispatches results to sinks or outcomes.
    fn apply_results(&mut self, results: Vec<RowResult>) -> Result<(), EngineError> {
        for result in results {
            match result.outcome {
                TokenOutcome::Completed => {
                    if !self.processor.is_merged_token(&result.token_id) {
                        self.counters.rows_succeeded += 1;
                    }
                }
                TokenOutcome::Routed => self.counters.rows_routed += 1,
                TokenOutcome::Forked => self.counters.rows_forked += 1,
                TokenOutcome::Failed => self.counters.rows_failed += 1,
                TokenOutcome::ConsumedInBatch => self.counters.rows_consumed_in_batch += 1,
                TokenOutcome::Coalesced | TokenOutcome::Quarantined => {}
            }

            match (&result.sink, result.final_data) {
                (Some(sink), Some(row)) => {
                    let runtime = self.sinks.get_mut(sink).ok_or_else(|| {
                        EngineError::Invariant(format!("result routed to unknown sink '{sink}'"))
                    })?;
                    runtime.pending.push(PendingSinkRow {
                        token: Some((result.token_id, result.outcome, result.error)),
                        row,
                    });
                }
                _ => {
                    // Not sink-bound: the disposition is final right now.
                    self.recorder.record_token_outcome(
                        &result.token_id,
                        result.outcome,
                        result.error.as_ref(),
                    )?;
                    self.emit_outcome(&result.token_id, result.outcome);
                }
            }
        }
        Ok(())
    }

    /// Buffers aggregation flush rows into the default sink's pending batch.
    fn apply_aggregation_flushes(&mut self, flushes: Vec<AggregationFlush>) {
        for flush in flushes {
            let Some(runtime) = self.sinks.get_mut(&self.default_sink) else {
                continue;
            };
            if runtime.anchor_fallback.is_none() {
                runtime.anchor_fallback = flush.anchor_token.clone();
            }
            for row in flush.rows {
                runtime.pending.push(PendingSinkRow {
                    token: None,
                    row,
                });
            }
        }
    }

    /// Flushes every sink whose pending batch reached its threshold.
    fn flush_full_sinks(&mut self) -> Result<(), EngineError> {
        let due: Vec<SinkName> = self
            .sinks
            .iter()
            .filter(|(_, runtime)| {
                !runtime.pending.is_empty() && runtime.pending.len() >= runtime.flush_threshold
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in due {
            self.flush_sink(&name)?;
        }
        Ok(())
    }

    /// Flushes every sink with any pending rows.
    fn drain_all_sinks(&mut self) -> Result<(), EngineError> {
        let names: Vec<SinkName> = self
            .sinks
            .iter()
            .filter(|(_, runtime)| !runtime.pending.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            self.flush_sink(&name)?;
        }
        Ok(())
    }

    /// Writes one sink's pending batch; outcomes are recorded only after the
    /// write and its artifact record succeed (the durability boundary).
    fn flush_sink(&mut self, name: &SinkName) -> Result<(), EngineError> {
        let sink_step = self.sink_step;
        let run_id = self.run_id.clone();
        let recorder = Arc::clone(&self.recorder);
        let runtime = self
            .sinks
            .get_mut(name)
            .ok_or_else(|| EngineError::Invariant(format!("unknown sink '{name}'")))?;
        if runtime.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut runtime.pending);
        let rows: Vec<RowData> = pending.iter().map(|entry| entry.row.clone()).collect();
        let anchor = pending
            .iter()
            .find_map(|entry| entry.token.as_ref().map(|(token_id, _, _)| token_id.clone()))
            .or_else(|| runtime.anchor_fallback.take())
            .ok_or_else(|| {
                EngineError::Invariant(format!("sink '{name}' batch has no anchoring token"))
            })?;

        let state = recorder.begin_node_state(
            &run_id,
            &anchor,
            &runtime.node_id,
            sink_step,
            &json!({"sink": name.as_str(), "rows": rows.len()}),
            1,
        )?;
        let ctx = runtime.context.with_state(state.state_id.clone());
        let started = Instant::now();
        let descriptor = match runtime.plugin.write(&rows, &ctx) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                let detail = json!({"error": err.to_string()});
                recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(&detail),
                    elapsed_ms(started),
                )?;
                return Err(EngineError::SinkWrite {
                    sink: name.clone(),
                    message: err.to_string(),
                });
            }
        };
        let output = serde_json::to_value(&descriptor)
            .map_err(|err| EngineError::Invariant(err.to_string()))?;
        recorder.complete_node_state(
            &state.state_id,
            NodeStateStatus::Completed,
            Some(&output),
            None,
            elapsed_ms(started),
        )?;
        let artifact = recorder.record_sink_artifact(&state.state_id, name, &descriptor)?;
        self.artifacts.push(artifact);

        for entry in pending {
            if let Some((token_id, outcome, error)) = entry.token {
                self.recorder.record_token_outcome(&token_id, outcome, error.as_ref())?;
                self.emit_outcome(&token_id, outcome);
            }
        }
        Ok(())
    }

    /// Emits a token-outcome telemetry event after its recorder write.
    fn emit_outcome(&self, token_id: &TokenId, outcome: TokenOutcome) {
        if let Some(sender) = &self.telemetry_sender {
            sender.emit(TelemetryEvent::TokenOutcomeRecorded {
                run_id: self.run_id.clone(),
                token_id: token_id.clone(),
                outcome,
            });
        }
    }

    /// Runs `on_start` hooks in dependency order; failures abort the run.
    fn call_start_hooks(&mut self) -> Result<(), EngineError> {
        self.source
            .on_start(&self.source_ctx)
            .map_err(|err| EngineError::StartHook(err.to_string()))?;
        for transform in self.processor.transforms_mut() {
            let ctx = transform.context.clone();
            transform
                .plugin
                .on_start(&ctx)
                .map_err(|err| EngineError::StartHook(err.to_string()))?;
        }
        for gate in self.processor.gates_mut() {
            let ctx = gate.context.clone();
            gate.plugin.on_start(&ctx).map_err(|err| EngineError::StartHook(err.to_string()))?;
        }
        for runtime in self.sinks.values_mut() {
            let ctx = runtime.context.clone();
            runtime
                .plugin
                .on_start(&ctx)
                .map_err(|err| EngineError::StartHook(err.to_string()))?;
        }
        Ok(())
    }

    /// Runs `on_complete` hooks on every exit path; failures are logged.
    fn call_complete_hooks(&mut self) {
        let ctx = self.source_ctx.clone();
        if let Err(err) = self.source.on_complete(&ctx) {
            warn!(%err, "source on_complete hook failed");
        }
        for transform in self.processor.transforms_mut() {
            let ctx = transform.context.clone();
            if let Err(err) = transform.plugin.on_complete(&ctx) {
                warn!(%err, transform = %transform.label, "transform on_complete hook failed");
            }
        }
        for gate in self.processor.gates_mut() {
            let ctx = gate.context.clone();
            if let Err(err) = gate.plugin.on_complete(&ctx) {
                warn!(%err, gate = %gate.plan.name, "gate on_complete hook failed");
            }
        }
        for (name, runtime) in &mut self.sinks {
            let ctx = runtime.context.clone();
            if let Err(err) = runtime.plugin.on_complete(&ctx) {
                warn!(%err, sink = %name, "sink on_complete hook failed");
            }
        }
    }

    /// Flushes and closes every sink; failures are logged, not raised.
    fn close_sinks(&mut self) {
        for (name, runtime) in &mut self.sinks {
            if let Err(err) = runtime.plugin.flush() {
                warn!(%err, sink = %name, "sink flush failed at close");
            }
            if let Err(err) = runtime.plugin.close() {
                warn!(%err, sink = %name, "sink close failed");
            }
        }
    }

    /// Checks the total-exporter-failure condition against the config flag.
    fn telemetry_total_failure_check(&self) -> bool {
        if !self.fail_on_total_exporter_failure {
            return true;
        }
        self.telemetry
            .as_ref()
            .is_none_or(|manager| !manager.health().total_exporter_failure)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns whole milliseconds elapsed since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
