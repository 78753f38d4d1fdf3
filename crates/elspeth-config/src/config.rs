// crates/elspeth-config/src/config.rs
// ============================================================================
// Module: ELSPETH Configuration
// Description: Settings loading and validation for pipeline runs.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: elspeth-core, serde, serde_json, toml
// ============================================================================

//! ## Overview
//! Settings are loaded from a TOML file with a hard size limit and
//! `deny_unknown_fields` everywhere, so a typo fails loudly instead of
//! silently doing nothing. The `from_settings` conversions translate the
//! user-facing surface into the validated runtime records the engine trusts;
//! every recognized setting either reaches a runtime field through one of
//! them or is named on the explicit exempt list.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use elspeth_core::core::identifiers::BranchName;
use elspeth_core::core::identifiers::CoalesceName;
use elspeth_core::core::identifiers::SinkName;
use elspeth_core::core::pipeline::AggregationOutputMode;
use elspeth_core::core::pipeline::AggregationSpec;
use elspeth_core::core::pipeline::BackpressureMode;
use elspeth_core::core::pipeline::CheckpointConfig;
use elspeth_core::core::pipeline::CoalescePolicy;
use elspeth_core::core::pipeline::CoalesceSpec;
use elspeth_core::core::pipeline::ConcurrencyConfig;
use elspeth_core::core::pipeline::GatePlan;
use elspeth_core::core::pipeline::MergeStrategy;
use elspeth_core::core::pipeline::PipelinePlan;
use elspeth_core::core::pipeline::RetryPolicy;
use elspeth_core::core::pipeline::RouteTarget;
use elspeth_core::core::pipeline::TelemetryGranularity;
use elspeth_core::core::pipeline::TelemetryRuntimeConfig;
use elspeth_core::core::pipeline::ThrottleConfig;
use elspeth_core::core::pipeline::TransformPlanEntry;
use elspeth_core::core::pipeline::internal_defaults;
use elspeth_core::core::results::ErrorDisposition;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum settings file size in bytes.
pub const MAX_SETTINGS_FILE_SIZE: usize = 1024 * 1024;

/// Canonicalization scheme tag stamped into run records.
pub const CANONICAL_VERSION: &str = "jcs-sha256-v1";

/// Settings keys that intentionally do not map to a `from_settings`
/// constructor in this crate; each names its consumer.
pub const EXEMPT_SETTINGS: &[(&str, &str)] = &[
    ("datasource", "resolved to a source plugin by the plugin registry"),
    ("sinks", "resolved to sink plugins by the plugin registry"),
    ("transforms", "resolved to transform plugins by the plugin registry"),
    ("gates", "compiled to condition gates by the plugin registry"),
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors (Tier 2: raised once, before any side effect).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("settings io error: {0}")]
    Io(String),
    /// Settings file could not be parsed.
    #[error("settings parse error: {0}")]
    Parse(String),
    /// Settings are structurally invalid.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Settings Surface
// ============================================================================

/// One plugin reference with its options blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSettings {
    /// Registered plugin name.
    pub plugin: String,
    /// Plugin-specific options.
    #[serde(default)]
    pub options: Value,
}

/// Source-boundary validation behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    /// Destination for rows failing source-side validation.
    #[serde(default = "default_discard")]
    pub on_validation_failure: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            on_validation_failure: default_discard(),
        }
    }
}

/// Returns the literal discard disposition.
fn default_discard() -> String {
    "discard".to_string()
}

/// One spine transform entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformSettings {
    /// Registered plugin name.
    pub plugin: String,
    /// Plugin-specific options.
    #[serde(default)]
    pub options: Value,
    /// Error disposition: `"discard"` or a sink name.
    #[serde(default = "default_discard")]
    pub on_error: String,
    /// Optional stable node label (defaults to `<plugin>-<index>`).
    #[serde(default)]
    pub node_id: Option<String>,
}

/// One gate entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    /// Gate name.
    pub name: String,
    /// Condition expression evaluated per row.
    pub condition: String,
    /// Labeled routes: `sink name`, `"continue"`, `"fork"`, or `"discard"`.
    pub routes: BTreeMap<String, String>,
    /// Fork branch labels; non-empty marks a fork gate.
    #[serde(default)]
    pub fork_to: Vec<String>,
}

/// One coalesce entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoalesceSettings {
    /// Coalesce name.
    pub name: String,
    /// Expected branch labels.
    pub branches: Vec<String>,
    /// Policy: `require_all`, `quorum`, `best_effort`, or `first`.
    pub policy: String,
    /// Merge strategy: `union`, `select_branch`, or `custom`.
    pub merge: String,
    /// Optional wait bound from first arrival, in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Required arrivals for the quorum policy.
    #[serde(default)]
    pub quorum_count: Option<usize>,
    /// Branch selected by the `select_branch` strategy.
    #[serde(default)]
    pub select_branch: Option<String>,
}

/// Aggregation trigger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSettings {
    /// Trigger kind: `count`, `time`, or `size`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Row threshold for `count` triggers.
    #[serde(default)]
    pub threshold: Option<u64>,
    /// Age threshold for `time` triggers, in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Byte threshold for `size` triggers.
    #[serde(default)]
    pub threshold_bytes: Option<u64>,
}

/// One aggregation entry, keyed by the transform node label it follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationSettings {
    /// Flush trigger.
    pub trigger: TriggerSettings,
    /// Output rendering: `batch` or `individual`.
    #[serde(default = "default_output_mode")]
    pub output_mode: String,
}

/// Returns the default aggregation output mode.
fn default_output_mode() -> String {
    "batch".to_string()
}

/// One sink entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkSettings {
    /// Registered plugin name.
    pub plugin: String,
    /// Plugin-specific options.
    #[serde(default)]
    pub options: Value,
    /// Pending-batch flush threshold in rows.
    #[serde(default)]
    pub flush_threshold: Option<usize>,
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Maximum total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry, in seconds.
    pub initial_delay_seconds: f64,
    /// Delay ceiling in seconds.
    pub max_delay_seconds: f64,
    /// Exponential growth base.
    pub exponential_base: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 0.2,
            max_delay_seconds: 30.0,
            exponential_base: 2.0,
        }
    }
}

/// Rate-limit settings for external-call dispatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Master enable switch.
    #[serde(default)]
    pub enabled: bool,
    /// Requests-per-second floor pacing.
    #[serde(default)]
    pub default_requests_per_second: Option<f64>,
    /// Requests-per-minute floor pacing.
    #[serde(default)]
    pub default_requests_per_minute: Option<f64>,
}

/// Concurrency settings for pooled external calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencySettings {
    /// Maximum concurrent workers.
    pub max_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
        }
    }
}

/// Checkpoint settings for resumable runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointSettings {
    /// Master enable switch.
    #[serde(default)]
    pub enabled: bool,
    /// Checkpoint cadence in rows.
    #[serde(default = "default_checkpoint_frequency")]
    pub frequency: u64,
    /// Whether aggregation flushes force a checkpoint.
    #[serde(default = "default_true")]
    pub aggregation_boundaries: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: default_checkpoint_frequency(),
            aggregation_boundaries: true,
        }
    }
}

/// Returns the default checkpoint cadence.
const fn default_checkpoint_frequency() -> u64 {
    100
}

/// Returns `true` for serde defaults.
const fn default_true() -> bool {
    true
}

/// One telemetry exporter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterSettings {
    /// Exporter kind: `log` or `file`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Output path for `file` exporters.
    #[serde(default)]
    pub path: Option<String>,
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySettings {
    /// Master enable switch.
    #[serde(default)]
    pub enabled: bool,
    /// Granularity: `off`, `minimal`, `standard`, or `full`.
    #[serde(default = "default_granularity")]
    pub granularity: String,
    /// Backpressure mode: `block` or `drop`.
    #[serde(default = "default_backpressure")]
    pub backpressure_mode: String,
    /// Whether total exporter failure fails the run.
    #[serde(default)]
    pub fail_on_total_exporter_failure: bool,
    /// Configured exporters.
    #[serde(default)]
    pub exporters: Vec<ExporterSettings>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            granularity: default_granularity(),
            backpressure_mode: default_backpressure(),
            fail_on_total_exporter_failure: false,
            exporters: Vec::new(),
        }
    }
}

/// Returns the default telemetry granularity.
fn default_granularity() -> String {
    "standard".to_string()
}

/// Returns the default telemetry backpressure mode.
fn default_backpressure() -> String {
    "drop".to_string()
}

/// The full user-facing settings surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Source plugin reference.
    pub datasource: PluginSettings,
    /// Source-boundary validation behavior.
    #[serde(default)]
    pub source: SourceSettings,
    /// Spine transforms in order.
    #[serde(default)]
    pub transforms: Vec<TransformSettings>,
    /// Gates in declaration order.
    #[serde(default)]
    pub gates: Vec<GateSettings>,
    /// Coalesce merge points.
    #[serde(default)]
    pub coalesce: Vec<CoalesceSettings>,
    /// Aggregations keyed by transform node label.
    #[serde(default)]
    pub aggregations: BTreeMap<String, AggregationSettings>,
    /// Sinks by name.
    pub sinks: BTreeMap<String, SinkSettings>,
    /// Default sink for spine completions.
    pub default_sink: String,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Rate-limit settings.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Concurrency settings.
    #[serde(default)]
    pub concurrency: ConcurrencySettings,
    /// Checkpoint settings.
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl Settings {
    /// Loads settings from a TOML file, enforcing the size limit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, oversized, or does
    /// not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if raw.len() > MAX_SETTINGS_FILE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "settings file exceeds {MAX_SETTINGS_FILE_SIZE} bytes"
            )));
        }
        Self::parse(&raw)
    }

    /// Parses settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document does not match the
    /// settings surface.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the effective configuration snapshot hashed into run records.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the settings cannot be
    /// re-serialized.
    pub fn effective_snapshot(&self) -> Result<Value, ConfigError> {
        serde_json::to_value(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    // ------------------------------------------------------------------
    // from_settings constructors
    // ------------------------------------------------------------------

    /// Builds the structural pipeline plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown enums or inconsistent
    /// structure; full cross-checks run in the plan's own validation.
    pub fn pipeline_plan(&self) -> Result<PipelinePlan, ConfigError> {
        let mut transforms = Vec::with_capacity(self.transforms.len());
        for (index, transform) in self.transforms.iter().enumerate() {
            transforms.push(TransformPlanEntry {
                label: transform
                    .node_id
                    .clone()
                    .unwrap_or_else(|| format!("{}-{index}", transform.plugin)),
                on_error: parse_disposition(&transform.on_error),
            });
        }
        let mut gates = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let mut routes = BTreeMap::new();
            for (label, target) in &gate.routes {
                routes.insert(label.clone(), parse_route_target(target));
            }
            gates.push(GatePlan {
                name: gate.name.clone(),
                routes,
                fork_to: gate.fork_to.iter().map(BranchName::new).collect(),
            });
        }
        let mut coalesces = Vec::with_capacity(self.coalesce.len());
        for coalesce in &self.coalesce {
            coalesces.push(CoalesceSpec {
                name: CoalesceName::new(&coalesce.name),
                branches: coalesce.branches.iter().map(BranchName::new).collect(),
                policy: parse_policy(&coalesce.policy)?,
                merge: parse_merge(&coalesce.merge)?,
                timeout_ms: coalesce.timeout_seconds.map(seconds_to_millis),
                quorum_count: coalesce.quorum_count,
                select_branch: coalesce.select_branch.as_deref().map(BranchName::new),
            });
        }
        let mut aggregations = BTreeMap::new();
        for (label, aggregation) in &self.aggregations {
            aggregations.insert(
                label.clone(),
                AggregationSpec {
                    trigger: parse_trigger(&aggregation.trigger)?,
                    output_mode: parse_output_mode(&aggregation.output_mode)?,
                },
            );
        }
        let plan = PipelinePlan {
            transforms,
            gates,
            coalesces,
            aggregations,
            sinks: self.sinks.keys().map(SinkName::new).collect(),
            default_sink: SinkName::new(&self.default_sink),
            on_validation_failure: parse_disposition(&self.source.on_validation_failure),
        };
        plan.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(plan)
    }

    /// Builds the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the bounds are violated.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let policy = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay_ms: seconds_to_millis(self.retry.initial_delay_seconds),
            max_delay_ms: seconds_to_millis(self.retry.max_delay_seconds),
            exponential_base: self.retry.exponential_base,
            jitter: internal_defaults::RETRY_JITTER,
        };
        policy.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(policy)
    }

    /// Builds the AIMD throttle configuration from the rate limit settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the bounds are violated.
    pub fn throttle_config(&self) -> Result<ThrottleConfig, ConfigError> {
        let mut config = ThrottleConfig::default();
        if self.rate_limit.enabled {
            let per_second = self.rate_limit.default_requests_per_second;
            let per_minute = self.rate_limit.default_requests_per_minute;
            let floor_ms = match (per_second, per_minute) {
                (Some(rps), _) if rps > 0.0 => seconds_to_millis(1.0 / rps),
                (None, Some(rpm)) if rpm > 0.0 => seconds_to_millis(60.0 / rpm),
                _ => {
                    return Err(ConfigError::Invalid(
                        "rate_limit enabled without a positive request rate".to_string(),
                    ));
                }
            };
            config.min_dispatch_delay_ms = floor_ms;
            config.max_dispatch_delay_ms = config.max_dispatch_delay_ms.max(floor_ms);
        }
        config.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(config)
    }

    /// Builds the concurrency configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_workers` is zero.
    pub fn concurrency_config(&self) -> Result<ConcurrencyConfig, ConfigError> {
        let config = ConcurrencyConfig {
            max_workers: self.concurrency.max_workers,
        };
        config.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(config)
    }

    /// Builds the checkpoint configuration.
    #[must_use]
    pub const fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            enabled: self.checkpoint.enabled,
            frequency: self.checkpoint.frequency,
            aggregation_boundaries: self.checkpoint.aggregation_boundaries,
        }
    }

    /// Builds the telemetry runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown granularity, mode, or
    /// exporter kinds.
    pub fn telemetry_config(&self) -> Result<TelemetryRuntimeConfig, ConfigError> {
        let granularity = match self.telemetry.granularity.as_str() {
            "off" => TelemetryGranularity::Off,
            "minimal" => TelemetryGranularity::Minimal,
            "standard" => TelemetryGranularity::Standard,
            "full" => TelemetryGranularity::Full,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown telemetry granularity '{other}'"
                )));
            }
        };
        let backpressure_mode = match self.telemetry.backpressure_mode.as_str() {
            "block" => BackpressureMode::Block,
            "drop" => BackpressureMode::Drop,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown telemetry backpressure mode '{other}'"
                )));
            }
        };
        for exporter in &self.telemetry.exporters {
            match exporter.kind.as_str() {
                "log" => {}
                "file" => {
                    if exporter.path.is_none() {
                        return Err(ConfigError::Invalid(
                            "file exporter requires a path".to_string(),
                        ));
                    }
                }
                other => {
                    return Err(ConfigError::Invalid(format!("unknown exporter type '{other}'")));
                }
            }
        }
        Ok(TelemetryRuntimeConfig {
            enabled: self.telemetry.enabled,
            granularity,
            backpressure_mode,
            queue_size: internal_defaults::TELEMETRY_QUEUE_SIZE,
            fail_on_total_exporter_failure: self.telemetry.fail_on_total_exporter_failure,
        })
    }
}

// ============================================================================
// SECTION: Parse Helpers
// ============================================================================

/// Parses an error disposition string (`"discard"` or a sink name).
#[must_use]
pub fn parse_disposition(raw: &str) -> ErrorDisposition {
    if raw == "discard" {
        ErrorDisposition::Discard
    } else {
        ErrorDisposition::Route(SinkName::new(raw))
    }
}

/// Parses a gate route target string.
#[must_use]
pub fn parse_route_target(raw: &str) -> RouteTarget {
    match raw {
        "continue" => RouteTarget::Continue,
        "fork" => RouteTarget::Fork,
        "discard" => RouteTarget::Discard,
        sink => RouteTarget::Sink(SinkName::new(sink)),
    }
}

/// Parses a coalesce policy string.
fn parse_policy(raw: &str) -> Result<CoalescePolicy, ConfigError> {
    match raw {
        "require_all" => Ok(CoalescePolicy::RequireAll),
        "quorum" => Ok(CoalescePolicy::Quorum),
        "best_effort" => Ok(CoalescePolicy::BestEffort),
        "first" => Ok(CoalescePolicy::First),
        other => Err(ConfigError::Invalid(format!("unknown coalesce policy '{other}'"))),
    }
}

/// Parses a merge strategy string.
fn parse_merge(raw: &str) -> Result<MergeStrategy, ConfigError> {
    match raw {
        "union" => Ok(MergeStrategy::Union),
        "select_branch" => Ok(MergeStrategy::SelectBranch),
        "custom" => Ok(MergeStrategy::Custom),
        other => Err(ConfigError::Invalid(format!("unknown merge strategy '{other}'"))),
    }
}

/// Parses trigger settings into a validated spec.
fn parse_trigger(
    settings: &TriggerSettings,
) -> Result<elspeth_core::core::pipeline::TriggerSpec, ConfigError> {
    use elspeth_core::core::pipeline::TriggerSpec;
    let spec = match settings.kind.as_str() {
        "count" => TriggerSpec::Count {
            threshold: settings.threshold.ok_or_else(|| {
                ConfigError::Invalid("count trigger requires threshold".to_string())
            })?,
        },
        "time" => TriggerSpec::Time {
            timeout_ms: settings
                .timeout_seconds
                .map(seconds_to_millis)
                .ok_or_else(|| {
                    ConfigError::Invalid("time trigger requires timeout_seconds".to_string())
                })?,
        },
        "size" => TriggerSpec::Size {
            threshold_bytes: settings.threshold_bytes.ok_or_else(|| {
                ConfigError::Invalid("size trigger requires threshold_bytes".to_string())
            })?,
        },
        other => {
            return Err(ConfigError::Invalid(format!("unknown trigger type '{other}'")));
        }
    };
    spec.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
    Ok(spec)
}

/// Parses an aggregation output mode string.
fn parse_output_mode(raw: &str) -> Result<AggregationOutputMode, ConfigError> {
    match raw {
        "batch" => Ok(AggregationOutputMode::Batch),
        "individual" => Ok(AggregationOutputMode::Individual),
        other => Err(ConfigError::Invalid(format!("unknown output mode '{other}'"))),
    }
}

/// Converts non-negative seconds to whole milliseconds, saturating.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "Value is clamped to [0, u64::MAX] before conversion."
)]
#[must_use]
pub fn seconds_to_millis(seconds: f64) -> u64 {
    let millis = seconds * 1_000.0;
    if millis <= 0.0 {
        0
    } else if millis >= u64::MAX as f64 {
        u64::MAX
    } else {
        millis as u64
    }
}
