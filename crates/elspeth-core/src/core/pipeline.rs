// crates/elspeth-core/src/core/pipeline.rs
// ============================================================================
// Module: ELSPETH Pipeline Configuration Records
// Description: Validated runtime configuration for retry, throttle, coalesce,
//              aggregation, telemetry, and checkpointing.
// Purpose: Provide the typed records the engine trusts after one-time validation.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! These records are produced once from user settings (via `from_settings`
//! constructors in the config crate), validated, and then trusted for the
//! lifetime of a run. Validation failures here are configuration errors and
//! must surface before any side effect.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::CoalesceName;
use crate::core::identifiers::SinkName;
use crate::core::results::ErrorDisposition;

// ============================================================================
// SECTION: Internal Defaults
// ============================================================================

/// Internal defaults that are not part of the user-facing settings surface.
///
/// Each entry here must stay documented; settings-alignment checks treat this
/// registry as the single source of truth for values users cannot configure.
pub mod internal_defaults {
    /// Retry jitter factor applied to every backoff delay.
    pub const RETRY_JITTER: f64 = 1.0;
    /// Telemetry queue capacity in events.
    pub const TELEMETRY_QUEUE_SIZE: usize = 1_000;
    /// Row reorder buffer in-flight cap for batch-capable transforms.
    pub const REORDER_MAX_PENDING: usize = 64;
    /// Sink pending-batch flush threshold in rows.
    pub const SINK_FLUSH_THRESHOLD: usize = 256;
    /// Telemetry blocking-put timeout in milliseconds.
    pub const TELEMETRY_BLOCK_TIMEOUT_MS: u64 = 30_000;
    /// Dropped-event count per aggregate telemetry warning.
    pub const TELEMETRY_DROP_WARN_EVERY: u64 = 100;

    /// One documented internal default.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InternalDefault {
        /// Registry key.
        pub name: &'static str,
        /// Rendered value.
        pub value: &'static str,
        /// Why the value is internal rather than user-facing.
        pub rationale: &'static str,
    }

    /// Returns the full internal-defaults registry.
    #[must_use]
    pub const fn registry() -> &'static [InternalDefault] {
        &[
            InternalDefault {
                name: "retry.jitter",
                value: "1.0",
                rationale: "full jitter avoids synchronized retry storms; not a tuning knob",
            },
            InternalDefault {
                name: "telemetry.queue_size",
                value: "1000",
                rationale: "bounded export queue; sized for bursts, not for tuning",
            },
            InternalDefault {
                name: "batch.reorder_max_pending",
                value: "64",
                rationale: "reorder buffer backpressure cap for batch-capable transforms",
            },
            InternalDefault {
                name: "sink.flush_threshold",
                value: "256",
                rationale: "per-sink pending-batch flush threshold",
            },
            InternalDefault {
                name: "telemetry.block_timeout_ms",
                value: "30000",
                rationale: "blocking-put bound; expiry counts the event as dropped",
            },
            InternalDefault {
                name: "telemetry.drop_warn_every",
                value: "100",
                rationale: "aggregate WARN cadence for dropped events",
            },
        ]
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration-record validation errors.
///
/// # Invariants
/// - Raised at construction time, before any run side effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A numeric bound or relationship is violated.
    #[error("invalid pipeline configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Exponential backoff policy for retryable operations.
///
/// Delay for attempt `k` (1-indexed, after the initial try) is
/// `min(max_delay, base * exponential_base^(k-1))`, multiplied by
/// `uniform(1 - jitter, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential growth base.
    pub exponential_base: f64,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter: internal_defaults::RETRY_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Validates the policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] when any bound is violated.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.max_attempts < 1 {
            return Err(PlanError::Invalid("retry max_attempts must be >= 1".to_string()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PlanError::Invalid(
                "retry max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        if self.exponential_base <= 1.0 {
            return Err(PlanError::Invalid("retry exponential_base must be > 1.0".to_string()));
        }
        if !(0.0 ..= 1.0).contains(&self.jitter) {
            return Err(PlanError::Invalid("retry jitter must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatch Throttle
// ============================================================================

/// AIMD throttle configuration for external-call dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Floor dispatch delay in milliseconds.
    pub min_dispatch_delay_ms: u64,
    /// Ceiling dispatch delay in milliseconds.
    pub max_dispatch_delay_ms: u64,
    /// Multiplicative backoff applied on capacity errors.
    pub backoff_multiplier: f64,
    /// Additive recovery applied on success, in milliseconds.
    pub recovery_step_ms: u64,
    /// Total capacity-retry wall-clock budget per row, in milliseconds.
    pub max_capacity_retry_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_dispatch_delay_ms: 0,
            max_dispatch_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            recovery_step_ms: 50,
            max_capacity_retry_ms: 120_000,
        }
    }
}

impl ThrottleConfig {
    /// Validates the throttle bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] when any bound is violated.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.min_dispatch_delay_ms > self.max_dispatch_delay_ms {
            return Err(PlanError::Invalid(
                "throttle min_dispatch_delay_ms must be <= max_dispatch_delay_ms".to_string(),
            ));
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(PlanError::Invalid("throttle backoff_multiplier must be > 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Coalesce Specification
// ============================================================================

/// Merge policy for a coalesce point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// All configured branches must arrive.
    RequireAll,
    /// At least `quorum_count` branches must arrive.
    Quorum,
    /// Merge whatever arrived once every branch is accounted for.
    BestEffort,
    /// First arrival wins; later siblings are consumed.
    First,
}

/// Strategy for combining arrived branch rows into one merged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Shallow merge in arrival order, last writer wins, one nested level.
    Union,
    /// Take the named branch's row verbatim.
    SelectBranch,
    /// Pass the arrived map through for downstream consumers.
    Custom,
}

/// Configuration of one coalesce merge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceSpec {
    /// Coalesce name, referenced by fork branches.
    pub name: CoalesceName,
    /// Branch labels expected to arrive.
    pub branches: Vec<BranchName>,
    /// Merge policy.
    pub policy: CoalescePolicy,
    /// Merge strategy.
    pub merge: MergeStrategy,
    /// Optional wait bound measured from first arrival, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Required arrivals for the quorum policy.
    pub quorum_count: Option<usize>,
    /// Branch selected by the `select_branch` strategy.
    pub select_branch: Option<BranchName>,
}

impl CoalesceSpec {
    /// Validates internal consistency of the coalesce configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] when the configuration is inconsistent.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.branches.is_empty() {
            return Err(PlanError::Invalid(format!(
                "coalesce '{}' must declare at least one branch",
                self.name
            )));
        }
        match self.policy {
            CoalescePolicy::Quorum => {
                let count = self.quorum_count.ok_or_else(|| {
                    PlanError::Invalid(format!(
                        "coalesce '{}' uses quorum policy without quorum_count",
                        self.name
                    ))
                })?;
                if count == 0 || count > self.branches.len() {
                    return Err(PlanError::Invalid(format!(
                        "coalesce '{}' quorum_count {} out of range 1..={}",
                        self.name,
                        count,
                        self.branches.len()
                    )));
                }
            }
            CoalescePolicy::RequireAll | CoalescePolicy::BestEffort | CoalescePolicy::First => {}
        }
        if self.merge == MergeStrategy::SelectBranch {
            let selected = self.select_branch.as_ref().ok_or_else(|| {
                PlanError::Invalid(format!(
                    "coalesce '{}' uses select_branch merge without select_branch",
                    self.name
                ))
            })?;
            if !self.branches.contains(selected) {
                return Err(PlanError::Invalid(format!(
                    "coalesce '{}' select_branch '{selected}' is not a declared branch",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Aggregation Specification
// ============================================================================

/// Trigger deciding when an aggregation buffer flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Flush at a row count.
    Count {
        /// Row threshold.
        threshold: u64,
    },
    /// Flush after a duration since first accept.
    Time {
        /// Age threshold in milliseconds.
        timeout_ms: u64,
    },
    /// Flush at a buffered payload size.
    Size {
        /// Byte threshold.
        threshold_bytes: u64,
    },
}

impl TriggerSpec {
    /// Validates the trigger threshold.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] when the threshold is zero.
    pub fn validate(&self) -> Result<(), PlanError> {
        let valid = match self {
            Self::Count {
                threshold,
            } => *threshold > 0,
            Self::Time {
                timeout_ms,
            } => *timeout_ms > 0,
            Self::Size {
                threshold_bytes,
            } => *threshold_bytes > 0,
        };
        if valid {
            Ok(())
        } else {
            Err(PlanError::Invalid("aggregation trigger threshold must be > 0".to_string()))
        }
    }
}

/// How an aggregation renders its buffered rows on flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationOutputMode {
    /// Emit one row containing the buffered rows and their count.
    Batch,
    /// Re-emit the buffered rows unchanged.
    Individual,
}

/// Configuration of one aggregation node, keyed by the transform it follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Flush trigger.
    pub trigger: TriggerSpec,
    /// Flush output rendering.
    pub output_mode: AggregationOutputMode,
}

// ============================================================================
// SECTION: Telemetry Configuration
// ============================================================================

/// Telemetry event granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryGranularity {
    /// No events.
    Off,
    /// Run lifecycle only.
    Minimal,
    /// Run lifecycle plus token outcomes.
    Standard,
    /// Everything, including external calls.
    Full,
}

/// Telemetry queue backpressure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Block the pipeline (bounded by a timeout) until queue space frees.
    Block,
    /// Never slow the pipeline; count overflow as dropped.
    Drop,
}

/// Runtime telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRuntimeConfig {
    /// Master enable switch.
    pub enabled: bool,
    /// Event granularity.
    pub granularity: TelemetryGranularity,
    /// Queue backpressure policy.
    pub backpressure_mode: BackpressureMode,
    /// Queue capacity in events.
    pub queue_size: usize,
    /// Whether total exporter failure fails the run at close.
    pub fail_on_total_exporter_failure: bool,
}

impl Default for TelemetryRuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            granularity: TelemetryGranularity::Standard,
            backpressure_mode: BackpressureMode::Drop,
            queue_size: internal_defaults::TELEMETRY_QUEUE_SIZE,
            fail_on_total_exporter_failure: false,
        }
    }
}

// ============================================================================
// SECTION: Checkpoint Configuration
// ============================================================================

/// Checkpointing configuration for resumable runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Master enable switch.
    pub enabled: bool,
    /// Checkpoint cadence in rows.
    pub frequency: u64,
    /// Whether aggregation flushes force a checkpoint.
    pub aggregation_boundaries: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 100,
            aggregation_boundaries: true,
        }
    }
}

// ============================================================================
// SECTION: Concurrency Configuration
// ============================================================================

/// Worker-pool sizing for plugin-level concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent workers for pooled external calls.
    pub max_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
        }
    }
}

impl ConcurrencyConfig {
    /// Validates the pool size.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] when `max_workers` is zero.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.max_workers == 0 {
            return Err(PlanError::Invalid("concurrency max_workers must be >= 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Pipeline Plan
// ============================================================================

/// Destination of a labeled gate route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// Continue down the spine.
    Continue,
    /// Route to the named sink.
    Sink(SinkName),
    /// Fork into the gate's configured branches.
    Fork,
    /// Drop the row.
    Discard,
}

/// Structural description of one spine transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformPlanEntry {
    /// Stable label for the transform position (settings `node_id` or the
    /// plugin name suffixed with its index).
    pub label: String,
    /// Error disposition for data-level failures.
    pub on_error: ErrorDisposition,
}

/// Structural description of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePlan {
    /// Gate name.
    pub name: String,
    /// Labeled routes out of the gate.
    pub routes: BTreeMap<String, RouteTarget>,
    /// Fork branch labels; non-empty marks this gate as a fork gate.
    pub fork_to: Vec<BranchName>,
}

/// Structural pipeline plan: everything the graph builder and validators need,
/// with no plugin instances attached.
///
/// # Invariants
/// - Validated once at construction (Tier 2), then trusted for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePlan {
    /// Spine transforms in order.
    pub transforms: Vec<TransformPlanEntry>,
    /// Gates in declaration order.
    pub gates: Vec<GatePlan>,
    /// Coalesce merge points.
    pub coalesces: Vec<CoalesceSpec>,
    /// Aggregations keyed by the transform label they follow.
    pub aggregations: BTreeMap<String, AggregationSpec>,
    /// Configured sink names.
    pub sinks: Vec<SinkName>,
    /// Default sink for spine completions.
    pub default_sink: SinkName,
    /// Destination for source-side validation failures.
    pub on_validation_failure: ErrorDisposition,
}

impl PipelinePlan {
    /// Validates the plan and resolves each coalesce to its producing gate.
    ///
    /// Returns the 0-based gate index (in declaration order) per coalesce.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] for any configuration inconsistency:
    /// unknown sinks, branch labels without a destination, coalesces without
    /// a unique producing gate, or invalid coalesce parameters.
    pub fn validate(&self) -> Result<BTreeMap<CoalesceName, usize>, PlanError> {
        let sink_set: BTreeSet<&SinkName> = self.sinks.iter().collect();
        if !sink_set.contains(&self.default_sink) {
            return Err(PlanError::Invalid(format!(
                "default_sink '{}' is not a configured sink",
                self.default_sink
            )));
        }
        if let ErrorDisposition::Route(sink) = &self.on_validation_failure
            && !sink_set.contains(sink)
        {
            return Err(PlanError::Invalid(format!(
                "source on_validation_failure references unknown sink '{sink}'"
            )));
        }
        for transform in &self.transforms {
            if let ErrorDisposition::Route(sink) = &transform.on_error
                && !sink_set.contains(sink)
            {
                return Err(PlanError::Invalid(format!(
                    "transform '{}' on_error references unknown sink '{sink}'",
                    transform.label
                )));
            }
        }
        for aggregation_label in self.aggregations.keys() {
            if !self.transforms.iter().any(|entry| &entry.label == aggregation_label) {
                return Err(PlanError::Invalid(format!(
                    "aggregation references unknown transform '{aggregation_label}'"
                )));
            }
        }
        for aggregation in self.aggregations.values() {
            aggregation.trigger.validate()?;
        }

        let mut branch_to_coalesce: BTreeMap<&BranchName, &CoalesceName> = BTreeMap::new();
        for coalesce in &self.coalesces {
            coalesce.validate()?;
            for branch in &coalesce.branches {
                if branch_to_coalesce.insert(branch, &coalesce.name).is_some() {
                    return Err(PlanError::Invalid(format!(
                        "branch '{branch}' appears in more than one coalesce"
                    )));
                }
            }
        }

        for gate in &self.gates {
            for (label, target) in &gate.routes {
                match target {
                    RouteTarget::Sink(sink) => {
                        if !sink_set.contains(sink) {
                            return Err(PlanError::Invalid(format!(
                                "gate '{}' route '{label}' references unknown sink '{sink}'",
                                gate.name
                            )));
                        }
                    }
                    RouteTarget::Continue | RouteTarget::Fork | RouteTarget::Discard => {}
                }
            }
            for branch in &gate.fork_to {
                let coalesced = branch_to_coalesce.contains_key(branch);
                let routed_to_sink = matches!(
                    gate.routes.get(branch.as_str()),
                    Some(RouteTarget::Sink(_))
                );
                if !coalesced && !routed_to_sink {
                    return Err(PlanError::Invalid(format!(
                        "gate '{}' fork branch '{branch}' neither coalesces nor routes to a sink",
                        gate.name
                    )));
                }
                if coalesced && routed_to_sink {
                    return Err(PlanError::Invalid(format!(
                        "gate '{}' fork branch '{branch}' both coalesces and routes to a sink",
                        gate.name
                    )));
                }
            }
        }

        let mut coalesce_gate_index = BTreeMap::new();
        for coalesce in &self.coalesces {
            let mut producer = None;
            for (gate_index, gate) in self.gates.iter().enumerate() {
                let covers = coalesce.branches.iter().all(|branch| gate.fork_to.contains(branch));
                if covers && !gate.fork_to.is_empty() {
                    if producer.is_some() {
                        return Err(PlanError::Invalid(format!(
                            "coalesce '{}' has more than one producing fork gate",
                            coalesce.name
                        )));
                    }
                    producer = Some(gate_index);
                }
            }
            let gate_index = producer.ok_or_else(|| {
                PlanError::Invalid(format!(
                    "coalesce '{}' has no fork gate producing all of its branches",
                    coalesce.name
                ))
            })?;
            coalesce_gate_index.insert(coalesce.name.clone(), gate_index);
        }

        Ok(coalesce_gate_index)
    }

    /// Returns the branch-to-coalesce lookup for fork dispatch.
    #[must_use]
    pub fn branch_to_coalesce(&self) -> BTreeMap<BranchName, CoalesceName> {
        let mut map = BTreeMap::new();
        for coalesce in &self.coalesces {
            for branch in &coalesce.branches {
                map.insert(branch.clone(), coalesce.name.clone());
            }
        }
        map
    }
}
