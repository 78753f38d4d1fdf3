// crates/elspeth-core/src/runtime/processor.rs
// ============================================================================
// Module: ELSPETH Row Processor
// Description: Per-row work-queue walker through the execution graph.
// Purpose: Drive transforms, gates, aggregation, and coalesce for one source
//          row, yielding one RowResult per terminal token disposition.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! For a pipeline with `T` transforms and `G` gates, step 0 is the source
//! visit, steps `1..=T` are transforms, and steps `T+1..=T+G` are gates in
//! declaration order. A coalesce whose producing gate has 0-based gate index
//! `g` sits at step `T + g + 1`: fork children carry that step with a
//! coalesce marker so the pre-coalesce check intercepts them before the gate
//! would re-run, and merged tokens resume at the following step. Every token
//! the processor touches ends in exactly one [`RowResult`]; silent drops are
//! forbidden.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::core::hashing::canonical_json_bytes;
use crate::core::identifiers::CoalesceName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::StateId;
use crate::core::pipeline::AggregationOutputMode;
use crate::core::pipeline::AggregationSpec;
use crate::core::pipeline::GatePlan;
use crate::core::pipeline::RouteTarget;
use crate::core::records::CONTINUE_LABEL;
use crate::core::records::EdgeMode;
use crate::core::records::error_label;
use crate::core::results::ErrorDisposition;
use crate::core::results::RoutingAction;
use crate::core::results::RowData;
use crate::core::results::RowResult;
use crate::core::results::TransformResult;
use crate::core::states::NodeStateStatus;
use crate::core::states::TokenOutcome;
use crate::interfaces::plugins::GatePlugin;
use crate::interfaces::plugins::PluginContext;
use crate::interfaces::plugins::TransformPlugin;
use crate::interfaces::recorder::Recorder;
use crate::runtime::coalesce::CoalesceExecutor;
use crate::runtime::coalesce::CoalesceResolution;
use crate::runtime::error::EngineError;
use crate::runtime::graph::ExecutionGraph;
use crate::runtime::retry::RetryManager;
use crate::runtime::tokens::Token;
use crate::runtime::tokens::TokenManager;
use crate::runtime::triggers::TriggerEvaluator;

// ============================================================================
// SECTION: Runtime Bindings
// ============================================================================

/// One spine transform bound to its node, context, and error disposition.
pub struct TransformRuntime {
    /// Transform plugin instance.
    pub plugin: Box<dyn TransformPlugin>,
    /// Error disposition for data-level failures.
    pub on_error: ErrorDisposition,
    /// Registered node identifier.
    pub node_id: NodeId,
    /// Stable label from the plan.
    pub label: String,
    /// Base plugin context (state unset).
    pub context: PluginContext,
    /// Attached aggregation, when configured.
    pub aggregation: Option<AggregationRuntime>,
}

/// One gate bound to its node, context, and route plan.
pub struct GateRuntime {
    /// Gate plugin instance.
    pub plugin: Box<dyn GatePlugin>,
    /// Structural gate plan (routes and fork branches).
    pub plan: GatePlan,
    /// Registered node identifier.
    pub node_id: NodeId,
    /// Base plugin context (state unset).
    pub context: PluginContext,
}

/// Aggregation buffer attached to a transform position.
pub struct AggregationRuntime {
    /// Registered aggregation node identifier.
    pub node_id: NodeId,
    /// Aggregation configuration.
    pub spec: AggregationSpec,
    /// Spine step of the transform this aggregation follows.
    pub spine_step: u32,
    /// Flush trigger state.
    pub evaluator: TriggerEvaluator,
    /// Buffered rows awaiting a flush.
    pub buffered: Vec<RowData>,
    /// Tokens consumed into the current buffer.
    pub buffered_tokens: Vec<Token>,
}

/// Rows released by an aggregation flush, destined for the default sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationFlush {
    /// Aggregation node that flushed.
    pub node_id: NodeId,
    /// Rendered output rows.
    pub rows: Vec<RowData>,
    /// Number of buffered rows consumed by the flush.
    pub consumed_rows: u64,
    /// First consumed token, anchoring the sink-write state for the batch.
    pub anchor_token: Option<crate::core::identifiers::TokenId>,
}

/// Work item on the per-row queue.
#[derive(Debug)]
struct WorkItem {
    /// Token to advance.
    token: Token,
    /// First step to execute.
    start_step: u32,
    /// Set when the token must land at a coalesce instead of walking.
    coalesce_at_step: Option<u32>,
    /// Coalesce the token is bound for.
    coalesce_name: Option<CoalesceName>,
}

/// Verdict of one step execution.
enum StepVerdict {
    /// Token advances to the next step.
    Continue,
    /// Token reached a terminal disposition.
    Terminal(RowResult),
}

// ============================================================================
// SECTION: Row Processor
// ============================================================================

/// Per-row work-queue walker through the execution graph.
pub struct RowProcessor {
    /// Owning run identifier.
    run_id: RunId,
    /// Shared recorder handle.
    recorder: Arc<dyn Recorder>,
    /// Shared execution graph.
    graph: Arc<ExecutionGraph>,
    /// Source node identifier for step-0 states.
    source_node: NodeId,
    /// Spine transforms in order.
    transforms: Vec<TransformRuntime>,
    /// Gates in declaration order.
    gates: Vec<GateRuntime>,
    /// Token allocator.
    tokens: TokenManager,
    /// Coalesce state machine.
    coalesce: CoalesceExecutor,
    /// Retry manager for retryable transform faults.
    retry: RetryManager,
    /// Default sink for spine completions.
    default_sink: SinkName,
    /// Successful coalesce merges this run.
    coalesce_merges: u64,
    /// Failed coalesce resolutions this run.
    coalesce_failures: u64,
    /// Tokens created by coalesce merges, excluded from success counting.
    merged_tokens: std::collections::BTreeSet<crate::core::identifiers::TokenId>,
}

impl RowProcessor {
    /// Creates a processor from its bound components.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "One-time wiring done by the orchestrator.")]
    pub fn new(
        run_id: RunId,
        recorder: Arc<dyn Recorder>,
        graph: Arc<ExecutionGraph>,
        source_node: NodeId,
        transforms: Vec<TransformRuntime>,
        gates: Vec<GateRuntime>,
        tokens: TokenManager,
        coalesce: CoalesceExecutor,
        retry: RetryManager,
        default_sink: SinkName,
    ) -> Self {
        Self {
            run_id,
            recorder,
            graph,
            source_node,
            transforms,
            gates,
            tokens,
            coalesce,
            retry,
            default_sink,
            coalesce_merges: 0,
            coalesce_failures: 0,
            merged_tokens: std::collections::BTreeSet::new(),
        }
    }

    /// Returns `(merges, failures)` accumulated by the coalesce subsystem.
    #[must_use]
    pub const fn coalesce_stats(&self) -> (u64, u64) {
        (self.coalesce_merges, self.coalesce_failures)
    }

    /// Reports whether a token was created by a coalesce merge.
    #[must_use]
    pub fn is_merged_token(&self, token_id: &crate::core::identifiers::TokenId) -> bool {
        self.merged_tokens.contains(token_id)
    }

    /// Quarantines a source row: persists it, opens a failed step-0 state,
    /// records the reserved DIVERT routing event and the validation error,
    /// and hands the row back for the quarantine sink's pending batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Graph`] when the reserved `__quarantine__` edge
    /// is missing; a quarantined item with nowhere to go is an engine bug.
    pub fn quarantine_row(
        &mut self,
        row_index: u64,
        row: RowData,
        error: &str,
        sink: &SinkName,
    ) -> Result<RowResult, EngineError> {
        let row_record =
            self.recorder.record_row(&self.run_id, &self.source_node, row_index, &row)?;
        let token = self.tokens.create_initial_token(&row_record, row)?;
        let detail = json!({"error": error});
        let state_id =
            self.record_source_visit(&token, NodeStateStatus::Failed, Some(&detail))?;
        let edge = self.graph.edge(&self.source_node, crate::core::records::QUARANTINE_LABEL)?;
        let edge = edge.clone();
        let reason = json!({"quarantined": true, "error": error, "destination": sink.as_str()});
        self.recorder.record_routing_event(&state_id, &edge, EdgeMode::Divert, &reason)?;
        self.recorder.record_validation_error(
            &self.run_id,
            &token.row_id,
            &self.source_node,
            "strict",
            error,
            sink.as_str(),
        )?;
        Ok(RowResult {
            token_id: token.token_id,
            outcome: TokenOutcome::Quarantined,
            sink: Some(sink.clone()),
            final_data: Some(token.row_data),
            error: Some(detail),
        })
    }

    /// Returns mutable access to the transforms for lifecycle hooks.
    pub fn transforms_mut(&mut self) -> &mut [TransformRuntime] {
        &mut self.transforms
    }

    /// Returns mutable access to the gates for lifecycle hooks.
    pub fn gates_mut(&mut self) -> &mut [GateRuntime] {
        &mut self.gates
    }

    /// Processes one freshly observed source row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for Tier-1 failures; data-level failures are
    /// reported inside the returned results.
    pub fn process_row(
        &mut self,
        row_index: u64,
        row: RowData,
    ) -> Result<Vec<RowResult>, EngineError> {
        let row_record =
            self.recorder.record_row(&self.run_id, &self.source_node, row_index, &row)?;
        let token = self.tokens.create_initial_token(&row_record, row)?;
        let _state = self.record_source_visit(&token, NodeStateStatus::Completed, None)?;
        self.run_work_queue(WorkItem {
            token,
            start_step: 1,
            coalesce_at_step: None,
            coalesce_name: None,
        })
    }

    /// Replays a previously recorded row under a fresh root token.
    ///
    /// The walk restarts from step 1: intermediate payloads are not persisted
    /// (only their hashes), so deterministic transforms are re-run and the
    /// resume law still yields identical sink hashes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for Tier-1 failures.
    pub fn process_existing_row(
        &mut self,
        row_id: &RowId,
        row: RowData,
        last_completed_step: u32,
    ) -> Result<Vec<RowResult>, EngineError> {
        debug!(%row_id, last_completed_step, "replaying recorded row under a fresh root token");
        let token = self.tokens.create_for_existing_row(row_id, row)?;
        let _state = self.record_source_visit(&token, NodeStateStatus::Completed, None)?;
        self.run_work_queue(WorkItem {
            token,
            start_step: 1,
            coalesce_at_step: None,
            coalesce_name: None,
        })
    }

    /// Opens and closes the step-0 source visit for a root token, returning
    /// the state for any follow-up routing event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when recording fails.
    pub fn record_source_visit(
        &mut self,
        token: &Token,
        status: NodeStateStatus,
        error: Option<&Value>,
    ) -> Result<StateId, EngineError> {
        let input = Value::Object(token.row_data.clone());
        let state = self.recorder.begin_node_state(
            &self.run_id,
            &token.token_id,
            &self.source_node,
            0,
            &input,
            1,
        )?;
        let output = match status {
            NodeStateStatus::Completed => Some(&input),
            NodeStateStatus::Running | NodeStateStatus::Failed => None,
        };
        self.recorder.complete_node_state(&state.state_id, status, output, error, 0)?;
        Ok(state.state_id)
    }

    /// Resolves coalesce timeouts; called between rows and at exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when resolution recording fails.
    pub fn sweep_coalesce_timeouts(&mut self, now: Instant) -> Result<Vec<RowResult>, EngineError> {
        let resolutions = self.coalesce.check_timeouts(now);
        self.drain_resolutions(resolutions)
    }

    /// Forces resolution of every pending coalesce at source exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when resolution recording fails.
    pub fn flush_coalesce_pending(&mut self) -> Result<Vec<RowResult>, EngineError> {
        let resolutions = self.coalesce.flush_pending(Instant::now());
        self.drain_resolutions(resolutions)
    }

    /// Sweeps aggregation triggers, flushing any that are due.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when flush recording fails.
    pub fn sweep_aggregation_triggers(
        &mut self,
        now: Instant,
    ) -> Result<Vec<AggregationFlush>, EngineError> {
        self.flush_aggregations_matching(|aggregation| aggregation.evaluator.should_trigger(now))
    }

    /// Flushes every non-empty aggregation buffer at source exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when flush recording fails.
    pub fn flush_aggregations(&mut self) -> Result<Vec<AggregationFlush>, EngineError> {
        self.flush_aggregations_matching(|aggregation| aggregation.evaluator.buffer_count() > 0)
    }

    /// Runs coalesce resolutions through the standard handler outside a walk.
    fn drain_resolutions(
        &mut self,
        resolutions: Vec<CoalesceResolution>,
    ) -> Result<Vec<RowResult>, EngineError> {
        let mut results = Vec::new();
        let mut queue = VecDeque::new();
        for resolution in resolutions {
            self.handle_coalesce_resolution(resolution, &mut queue, &mut results)?;
        }
        while let Some(item) = queue.pop_front() {
            self.process_single_token(item, &mut queue, &mut results)?;
        }
        Ok(results)
    }

    /// Flushes aggregations selected by `due`, recording each flush.
    fn flush_aggregations_matching<P>(
        &mut self,
        due: P,
    ) -> Result<Vec<AggregationFlush>, EngineError>
    where
        P: Fn(&AggregationRuntime) -> bool,
    {
        let run_id = self.run_id.clone();
        let recorder = Arc::clone(&self.recorder);
        let mut flushes = Vec::new();
        for transform in &mut self.transforms {
            let Some(aggregation) = transform.aggregation.as_mut() else {
                continue;
            };
            if aggregation.buffered.is_empty() || !due(aggregation) {
                continue;
            }
            let consumed_rows = aggregation.evaluator.flush();
            let buffered = std::mem::take(&mut aggregation.buffered);
            let consumed_tokens = std::mem::take(&mut aggregation.buffered_tokens);
            let rows = match aggregation.spec.output_mode {
                AggregationOutputMode::Batch => {
                    let mut row = RowData::new();
                    row.insert(
                        "rows".to_string(),
                        Value::Array(buffered.iter().cloned().map(Value::Object).collect()),
                    );
                    row.insert("count".to_string(), json!(buffered.len()));
                    vec![row]
                }
                AggregationOutputMode::Individual => buffered,
            };
            if let Some(first) = consumed_tokens.first() {
                let metadata = json!({
                    "flushed_rows": consumed_rows,
                    "tokens": consumed_tokens
                        .iter()
                        .map(|token| token.token_id.as_str())
                        .collect::<Vec<_>>(),
                });
                let state = recorder.begin_node_state(
                    &run_id,
                    &first.token_id,
                    &aggregation.node_id,
                    aggregation.spine_step,
                    &metadata,
                    1,
                )?;
                let output = Value::Array(rows.iter().cloned().map(Value::Object).collect());
                recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&output),
                    None,
                    0,
                )?;
            }
            flushes.push(AggregationFlush {
                node_id: aggregation.node_id.clone(),
                rows,
                consumed_rows,
                anchor_token: consumed_tokens.first().map(|token| token.token_id.clone()),
            });
        }
        Ok(flushes)
    }

    /// Drains the per-row work queue starting from one item.
    fn run_work_queue(&mut self, initial: WorkItem) -> Result<Vec<RowResult>, EngineError> {
        let mut queue = VecDeque::from([initial]);
        let mut results = Vec::new();
        while let Some(item) = queue.pop_front() {
            self.process_single_token(item, &mut queue, &mut results)?;
        }
        Ok(results)
    }

    /// Advances one token until it holds, forks, or reaches a terminal.
    fn process_single_token(
        &mut self,
        item: WorkItem,
        queue: &mut VecDeque<WorkItem>,
        results: &mut Vec<RowResult>,
    ) -> Result<(), EngineError> {
        // Pre-coalesce check: fork children skip directly to their coalesce.
        if let Some(coalesce_step) = item.coalesce_at_step
            && coalesce_step == item.start_step
        {
            let name = item.coalesce_name.ok_or_else(|| {
                EngineError::Invariant("coalesce work item without a coalesce name".to_string())
            })?;
            let resolution =
                self.coalesce.accept(&name, item.token, Instant::now()).ok_or_else(|| {
                    EngineError::Invariant(format!("coalesce '{name}' is not configured"))
                })?;
            return self.handle_coalesce_resolution(resolution, queue, results);
        }

        let transform_count = u32::try_from(self.transforms.len())
            .map_err(|_| EngineError::Invariant("transform count overflow".to_string()))?;
        let gate_count = u32::try_from(self.gates.len())
            .map_err(|_| EngineError::Invariant("gate count overflow".to_string()))?;
        let last_step = transform_count + gate_count;

        let mut token = item.token;
        let mut step = item.start_step;
        while step <= last_step {
            let verdict = if step <= transform_count {
                self.run_transform_step(&mut token, step, results)?
            } else {
                self.run_gate_step(&mut token, step, transform_count, queue, results)?
            };
            match verdict {
                StepVerdict::Continue => step += 1,
                StepVerdict::Terminal(result) => {
                    results.push(result);
                    return Ok(());
                }
            }
        }

        // Post-spine: the token is destined for the default sink.
        results.push(RowResult {
            token_id: token.token_id.clone(),
            outcome: TokenOutcome::Completed,
            sink: Some(self.default_sink.clone()),
            final_data: Some(token.row_data),
            error: None,
        });
        Ok(())
    }

    /// Executes one transform step with retry and error routing.
    fn run_transform_step(
        &mut self,
        token: &mut Token,
        step: u32,
        results: &mut Vec<RowResult>,
    ) -> Result<StepVerdict, EngineError> {
        let index = (step - 1) as usize;
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1u32;
        loop {
            let input = Value::Object(token.row_data.clone());
            let transform = self.transforms.get_mut(index).ok_or_else(|| {
                EngineError::Invariant(format!("transform step {step} out of range"))
            })?;
            let state = self.recorder.begin_node_state(
                &self.run_id,
                &token.token_id,
                &transform.node_id,
                step,
                &input,
                attempt,
            )?;
            let ctx = transform.context.with_state(state.state_id.clone());
            let started = Instant::now();
            let result = transform.plugin.process(token.row_data.clone(), &ctx);
            let duration_ms = elapsed_ms(started);

            let (detail, retryable) = match result {
                TransformResult::Success {
                    row,
                } => {
                    return self.finish_transform_success(
                        token,
                        step,
                        index,
                        &state.state_id,
                        row,
                        duration_ms,
                    );
                }
                TransformResult::SuccessMulti {
                    mut rows,
                } => {
                    if rows.len() == 1 {
                        let row = rows.remove(0);
                        return self.finish_transform_success(
                            token,
                            step,
                            index,
                            &state.state_id,
                            row,
                            duration_ms,
                        );
                    }
                    (
                        json!({
                            "error": "expand is not supported by this pipeline",
                            "rows_produced": rows.len(),
                        }),
                        false,
                    )
                }
                TransformResult::Error {
                    detail,
                    retryable,
                } => (detail, retryable),
            };

            if retryable && attempt < max_attempts {
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(&detail),
                    duration_ms,
                )?;
                self.retry.wait(attempt);
                attempt += 1;
                continue;
            }

            return self
                .finish_transform_failure(
                    token,
                    index,
                    &state.state_id,
                    &detail,
                    duration_ms,
                    results,
                )
                .map(StepVerdict::Terminal);
        }
    }

    /// Completes a successful transform visit and applies aggregation.
    fn finish_transform_success(
        &mut self,
        token: &mut Token,
        step: u32,
        index: usize,
        state_id: &StateId,
        row: RowData,
        duration_ms: u64,
    ) -> Result<StepVerdict, EngineError> {
        let output = Value::Object(row.clone());
        self.recorder.complete_node_state(
            state_id,
            NodeStateStatus::Completed,
            Some(&output),
            None,
            duration_ms,
        )?;
        token.row_data = row;

        let transform = self
            .transforms
            .get_mut(index)
            .ok_or_else(|| EngineError::Invariant(format!("transform step {step} out of range")))?;
        if let Some(aggregation) = transform.aggregation.as_mut() {
            let bytes = canonical_json_bytes(&token.row_data)?;
            let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            aggregation.evaluator.accept(size, Instant::now());
            aggregation.buffered.push(token.row_data.clone());
            aggregation.buffered_tokens.push(token.clone());
            return Ok(StepVerdict::Terminal(RowResult {
                token_id: token.token_id.clone(),
                outcome: TokenOutcome::ConsumedInBatch,
                sink: None,
                final_data: None,
                error: None,
            }));
        }
        Ok(StepVerdict::Continue)
    }

    /// Applies the transform's error disposition after retries are exhausted
    /// or the failure is non-retryable.
    #[allow(
        clippy::too_many_arguments,
        reason = "The terminal path threads the per-row result list for loss handling."
    )]
    fn finish_transform_failure(
        &mut self,
        token: &Token,
        index: usize,
        state_id: &StateId,
        detail: &Value,
        duration_ms: u64,
        results: &mut Vec<RowResult>,
    ) -> Result<RowResult, EngineError> {
        let (node_id, on_error) = {
            let transform = self.transforms.get(index).ok_or_else(|| {
                EngineError::Invariant(format!("transform index {index} out of range"))
            })?;
            (transform.node_id.clone(), transform.on_error.clone())
        };

        let destination = on_error.destination_label().to_string();
        if let ErrorDisposition::Route(_) = &on_error {
            let edge = self.graph.edge(&node_id, &error_label(index))?.clone();
            let reason = json!({"on_error": destination, "error": detail});
            self.recorder.record_routing_event(state_id, &edge, EdgeMode::Divert, &reason)?;
        }
        self.recorder.complete_node_state(
            state_id,
            NodeStateStatus::Failed,
            None,
            Some(detail),
            duration_ms,
        )?;
        self.recorder.record_transform_error(
            &self.run_id,
            state_id,
            &token.token_id,
            &node_id,
            detail,
            &destination,
        )?;

        // A lost fork branch must not starve its coalesce.
        self.notify_loss_if_branch(token, detail, results)?;

        match on_error {
            ErrorDisposition::Route(sink) => Ok(RowResult {
                token_id: token.token_id.clone(),
                outcome: TokenOutcome::Routed,
                sink: Some(sink),
                final_data: Some(token.row_data.clone()),
                error: Some(detail.clone()),
            }),
            ErrorDisposition::Discard => Ok(RowResult {
                token_id: token.token_id.clone(),
                outcome: TokenOutcome::Failed,
                sink: None,
                final_data: None,
                error: Some(detail.clone()),
            }),
        }
    }

    /// Notifies the coalesce executor when an error-routed token was a fork
    /// branch, draining any resulting resolution into `results`.
    fn notify_loss_if_branch(
        &mut self,
        token: &Token,
        detail: &Value,
        results: &mut Vec<RowResult>,
    ) -> Result<(), EngineError> {
        let Some(branch) = token.branch_name.clone() else {
            return Ok(());
        };
        let Some(coalesce_name) = self.graph.get_branch_to_coalesce_map().get(&branch).cloned()
        else {
            return Ok(());
        };
        let reason = detail.to_string();
        let resolution = self.coalesce.notify_branch_lost(
            &coalesce_name,
            &token.row_id,
            &branch,
            &reason,
            Instant::now(),
        );
        if let Some(resolution) = resolution {
            let mut queue = VecDeque::new();
            self.handle_coalesce_resolution(resolution, &mut queue, results)?;
            while let Some(item) = queue.pop_front() {
                self.process_single_token(item, &mut queue, results)?;
            }
        }
        Ok(())
    }

    /// Executes one gate step.
    fn run_gate_step(
        &mut self,
        token: &mut Token,
        step: u32,
        transform_count: u32,
        queue: &mut VecDeque<WorkItem>,
        results: &mut Vec<RowResult>,
    ) -> Result<StepVerdict, EngineError> {
        let gate_index = (step - transform_count - 1) as usize;
        let input = Value::Object(token.row_data.clone());
        let gate = self
            .gates
            .get_mut(gate_index)
            .ok_or_else(|| EngineError::Invariant(format!("gate step {step} out of range")))?;
        let state = self.recorder.begin_node_state(
            &self.run_id,
            &token.token_id,
            &gate.node_id,
            step,
            &input,
            1,
        )?;
        let ctx = gate.context.with_state(state.state_id.clone());
        let started = Instant::now();
        let evaluation = gate.plugin.evaluate(&token.row_data, &ctx);
        let duration_ms = elapsed_ms(started);
        let gate_node = gate.node_id.clone();
        let gate_plan = gate.plan.clone();

        let gate_result = match evaluation {
            Ok(result) => result,
            Err(error) => {
                let detail = json!({"error": error.to_string()});
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(&detail),
                    duration_ms,
                )?;
                return Ok(StepVerdict::Terminal(RowResult {
                    token_id: token.token_id.clone(),
                    outcome: TokenOutcome::Failed,
                    sink: None,
                    final_data: None,
                    error: Some(detail),
                }));
            }
        };

        match gate_result.action {
            RoutingAction::Discard => {
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&input),
                    None,
                    duration_ms,
                )?;
                Ok(StepVerdict::Terminal(RowResult {
                    token_id: token.token_id.clone(),
                    outcome: TokenOutcome::Failed,
                    sink: None,
                    final_data: None,
                    error: Some(json!({
                        "discarded_by": gate_plan.name,
                        "reason": gate_result.reason,
                    })),
                }))
            }
            RoutingAction::Continue => {
                let edge = self.graph.edge(&gate_node, CONTINUE_LABEL)?.clone();
                self.recorder.record_routing_event(
                    &state.state_id,
                    &edge,
                    EdgeMode::Move,
                    &gate_result.reason,
                )?;
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&input),
                    None,
                    duration_ms,
                )?;
                Ok(StepVerdict::Continue)
            }
            RoutingAction::RouteToSink {
                sink,
            } => {
                let label = gate_plan
                    .routes
                    .iter()
                    .find(|(_, target)| matches!(target, RouteTarget::Sink(s) if s == &sink))
                    .map(|(label, _)| label.clone())
                    .ok_or_else(|| {
                        EngineError::Invariant(format!(
                            "gate '{}' routed to unconfigured sink '{sink}'",
                            gate_plan.name
                        ))
                    })?;
                let edge = self.graph.edge(&gate_node, &label)?.clone();
                self.recorder.record_routing_event(
                    &state.state_id,
                    &edge,
                    EdgeMode::Move,
                    &gate_result.reason,
                )?;
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&input),
                    None,
                    duration_ms,
                )?;
                Ok(StepVerdict::Terminal(RowResult {
                    token_id: token.token_id.clone(),
                    outcome: TokenOutcome::Routed,
                    sink: Some(sink),
                    final_data: Some(token.row_data.clone()),
                    error: None,
                }))
            }
            RoutingAction::ForkToPaths {
                branches,
            } => {
                for branch in &branches {
                    if !gate_plan.fork_to.contains(branch) {
                        return Err(EngineError::Invariant(format!(
                            "gate '{}' forked to undeclared branch '{branch}'",
                            gate_plan.name
                        )));
                    }
                    let edge = self.graph.edge(&gate_node, branch.as_str())?.clone();
                    self.recorder.record_routing_event(
                        &state.state_id,
                        &edge,
                        EdgeMode::Copy,
                        &gate_result.reason,
                    )?;
                }
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&input),
                    None,
                    duration_ms,
                )?;

                let gate_idx_u32 = u32::try_from(gate_index)
                    .map_err(|_| EngineError::Invariant("gate index overflow".to_string()))?;
                for branch in &branches {
                    let child = self.tokens.fork_token(token, branch)?;
                    if let Some(coalesce_name) =
                        self.graph.get_branch_to_coalesce_map().get(branch).cloned()
                    {
                        let coalesce_step = transform_count + gate_idx_u32 + 1;
                        queue.push_back(WorkItem {
                            token: child,
                            start_step: coalesce_step,
                            coalesce_at_step: Some(coalesce_step),
                            coalesce_name: Some(coalesce_name),
                        });
                    } else {
                        let sink = match gate_plan.routes.get(branch.as_str()) {
                            Some(RouteTarget::Sink(sink)) => sink.clone(),
                            _ => {
                                return Err(EngineError::Invariant(format!(
                                    "fork branch '{branch}' has no coalesce and no sink route"
                                )));
                            }
                        };
                        results.push(RowResult {
                            token_id: child.token_id.clone(),
                            outcome: TokenOutcome::Routed,
                            sink: Some(sink),
                            final_data: Some(child.row_data),
                            error: None,
                        });
                    }
                }
                Ok(StepVerdict::Terminal(RowResult {
                    token_id: token.token_id.clone(),
                    outcome: TokenOutcome::Forked,
                    sink: None,
                    final_data: None,
                    error: None,
                }))
            }
        }
    }

    /// Applies one coalesce resolution: audit records, merged-token work
    /// items, and terminal results for consumed tokens.
    fn handle_coalesce_resolution(
        &mut self,
        resolution: CoalesceResolution,
        queue: &mut VecDeque<WorkItem>,
        results: &mut Vec<RowResult>,
    ) -> Result<(), EngineError> {
        match resolution {
            CoalesceResolution::Held => Ok(()),
            CoalesceResolution::Consumed {
                name,
                token,
                outcome,
            } => {
                let error = match outcome {
                    TokenOutcome::Failed => {
                        Some(json!({"error": format!("coalesce '{name}' already failed")}))
                    }
                    _ => None,
                };
                results.push(RowResult {
                    token_id: token.token_id,
                    outcome,
                    sink: None,
                    final_data: None,
                    error,
                });
                Ok(())
            }
            CoalesceResolution::Merged(merged) => {
                self.coalesce_merges += 1;
                let coalesce_node = self
                    .graph
                    .get_coalesce_id_map()
                    .get(&merged.name)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::Invariant(format!(
                            "coalesce '{}' has no registered node",
                            merged.name
                        ))
                    })?;
                let merged_token = self.tokens.create_merged_token(
                    &merged.row_id,
                    &merged.primary_parent,
                    merged.merged_row,
                )?;
                self.merged_tokens.insert(merged_token.token_id.clone());
                let state = self.recorder.begin_node_state(
                    &self.run_id,
                    &merged_token.token_id,
                    &coalesce_node,
                    merged.step,
                    &merged.metadata,
                    1,
                )?;
                let output = Value::Object(merged_token.row_data.clone());
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Completed,
                    Some(&output),
                    None,
                    0,
                )?;
                for contributor in merged.contributors {
                    results.push(RowResult {
                        token_id: contributor.token_id,
                        outcome: TokenOutcome::Coalesced,
                        sink: None,
                        final_data: None,
                        error: None,
                    });
                }
                queue.push_back(WorkItem {
                    token: merged_token,
                    start_step: merged.step + 1,
                    coalesce_at_step: None,
                    coalesce_name: None,
                });
                Ok(())
            }
            CoalesceResolution::Failed(failed) => {
                self.coalesce_failures += 1;
                let detail = json!({
                    "coalesce": failed.name.as_str(),
                    "reason": failed.reason,
                    "metadata": failed.metadata,
                });
                if let Some(first) = failed.consumed.first() {
                    let coalesce_node = self
                        .graph
                        .get_coalesce_id_map()
                        .get(&failed.name)
                        .cloned()
                        .ok_or_else(|| {
                            EngineError::Invariant(format!(
                                "coalesce '{}' has no registered node",
                                failed.name
                            ))
                        })?;
                    let state = self.recorder.begin_node_state(
                        &self.run_id,
                        &first.token_id,
                        &coalesce_node,
                        failed.step,
                        &failed.metadata,
                        1,
                    )?;
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(&detail),
                        0,
                    )?;
                }
                for token in failed.consumed {
                    results.push(RowResult {
                        token_id: token.token_id,
                        outcome: TokenOutcome::Failed,
                        sink: None,
                        final_data: None,
                        error: Some(detail.clone()),
                    });
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns whole milliseconds elapsed since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
