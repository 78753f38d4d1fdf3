// crates/elspeth-core/src/interfaces/plugins.rs
// ============================================================================
// Module: ELSPETH Plugin Protocols
// Description: Structural contracts for sources, transforms, gates, and sinks.
// Purpose: Define the only surfaces the engine inspects on plugin instances.
// Dependencies: crate::core, crate::interfaces::recorder, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Plugins are external collaborators: the engine depends on these traits and
//! nothing else about their types. Data-level failures travel as result
//! values ([`crate::core::TransformResult`], quarantined source items);
//! `PluginError` is reserved for faults that make the plugin itself unusable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::results::GateResult;
use crate::core::results::RowData;
use crate::core::results::SourceItem;
use crate::core::results::TransformResult;
use crate::core::states::ArtifactDescriptor;
use crate::core::states::TransformErrorRecord;
use crate::core::states::ValidationErrorRecord;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::recorder::RecorderError;
use crate::interfaces::telemetry::TelemetrySender;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plugin-level errors.
///
/// # Invariants
/// - Raised only for faults that make the plugin unusable (missing file,
///   broken handle); per-row data failures use result values instead.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin reported an error.
    #[error("plugin error: {0}")]
    Failed(String),
}

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Declared determinism class of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Determinism {
    /// Same input always produces the same output.
    Deterministic,
    /// Output varies run to run (LLM sampling, randomness).
    Nondeterministic,
    /// Reads external state.
    IoRead,
    /// Writes external state.
    IoWrite,
}

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Context handed to every plugin invocation.
///
/// # Invariants
/// - `state_id` is set per invocation by the executor before the call.
/// - Plugins mutate nothing here; recording goes through the methods below.
#[derive(Clone)]
pub struct PluginContext {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node this plugin instance is bound to.
    pub node_id: NodeId,
    /// Open node state for the current invocation.
    pub state_id: Option<StateId>,
    /// Plugin configuration options.
    pub config: Value,
    /// Shared recorder handle for external-call audits.
    pub recorder: Arc<dyn Recorder>,
    /// Telemetry emit handle; `None` disables telemetry for this plugin.
    pub telemetry: Option<TelemetrySender>,
}

impl PluginContext {
    /// Creates a context bound to a node, with no open state.
    #[must_use]
    pub const fn new(
        run_id: RunId,
        node_id: NodeId,
        config: Value,
        recorder: Arc<dyn Recorder>,
        telemetry: Option<TelemetrySender>,
    ) -> Self {
        Self {
            run_id,
            node_id,
            state_id: None,
            config,
            recorder,
            telemetry,
        }
    }

    /// Returns a copy of this context with the open state set.
    #[must_use]
    pub fn with_state(&self, state_id: StateId) -> Self {
        let mut ctx = self.clone();
        ctx.state_id = Some(state_id);
        ctx
    }

    /// Records a source-boundary validation failure for a row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    pub fn record_validation_error(
        &self,
        row_id: &RowId,
        schema_mode: &str,
        error: &str,
        destination: &str,
    ) -> Result<ValidationErrorRecord, RecorderError> {
        self.recorder.record_validation_error(
            &self.run_id,
            row_id,
            &self.node_id,
            schema_mode,
            error,
            destination,
        )
    }

    /// Records a transform-level data failure against the open state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when no state is open or the write fails.
    pub fn record_transform_error(
        &self,
        token_id: &TokenId,
        error_details: &Value,
        destination: &str,
    ) -> Result<TransformErrorRecord, RecorderError> {
        let state_id = self.state_id.as_ref().ok_or_else(|| {
            RecorderError::Constraint("transform error recorded outside a node state".to_string())
        })?;
        self.recorder.record_transform_error(
            &self.run_id,
            state_id,
            token_id,
            &self.node_id,
            error_details,
            destination,
        )
    }
}

// ============================================================================
// SECTION: Source Protocol
// ============================================================================

/// Owned iterator of source items.
pub type SourceStream = Box<dyn Iterator<Item = Result<SourceItem, PluginError>> + Send>;

/// Row producer.
pub trait SourcePlugin: Send {
    /// Returns the plugin's stable name.
    fn name(&self) -> &str;

    /// Returns the plugin's version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared output schema.
    fn output_schema(&self) -> Value {
        Value::Null
    }

    /// Opens the source and returns its item stream.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the source cannot be opened.
    fn load(&mut self, ctx: &PluginContext) -> Result<SourceStream, PluginError>;

    /// Lifecycle hook invoked before the run's main loop.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] to abort the run before any row is read.
    fn on_start(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Lifecycle hook invoked after the run, on success and failure paths.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; errors here are logged, never raised.
    fn on_complete(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Transform Protocol
// ============================================================================

/// Row mutator.
pub trait TransformPlugin: Send {
    /// Returns the plugin's stable name.
    fn name(&self) -> &str;

    /// Returns the plugin's version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared input schema.
    fn input_schema(&self) -> Value {
        Value::Null
    }

    /// Returns the declared output schema.
    fn output_schema(&self) -> Value {
        Value::Null
    }

    /// Returns the declared determinism class.
    fn determinism(&self) -> Determinism;

    /// Reports whether `process` batches rows internally behind a reorder
    /// buffer while preserving synchronous row-by-row semantics.
    fn is_batch_aware(&self) -> bool {
        false
    }

    /// Processes one row.
    fn process(&mut self, row: RowData, ctx: &PluginContext) -> TransformResult;

    /// Lifecycle hook invoked before the run's main loop.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] to abort the run before any row is read.
    fn on_start(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Lifecycle hook invoked after the run, on success and failure paths.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; errors here are logged, never raised.
    fn on_complete(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Gate Protocol
// ============================================================================

/// Routing decision point.
pub trait GatePlugin: Send {
    /// Returns the plugin's stable name.
    fn name(&self) -> &str;

    /// Returns the plugin's version string.
    fn plugin_version(&self) -> &str;

    /// Evaluates the gate for one row.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when evaluation itself fails; the token is
    /// then failed rather than silently dropped.
    fn evaluate(&mut self, row: &RowData, ctx: &PluginContext) -> Result<GateResult, PluginError>;

    /// Lifecycle hook invoked before the run's main loop.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] to abort the run before any row is read.
    fn on_start(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Lifecycle hook invoked after the run, on success and failure paths.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; errors here are logged, never raised.
    fn on_complete(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Sink Protocol
// ============================================================================

/// Row consumer producing artifacts.
pub trait SinkPlugin: Send {
    /// Returns the plugin's stable name.
    fn name(&self) -> &str;

    /// Returns the plugin's version string.
    fn plugin_version(&self) -> &str;

    /// Writes a batch of rows and returns the artifact descriptor.
    ///
    /// Empty batches must return a valid descriptor with `size_bytes = 0`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; sink write failures are durability failures
    /// and fatal to the run.
    fn write(
        &mut self,
        rows: &[RowData],
        ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError>;

    /// Ensures buffered output is durable.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the flush fails.
    fn flush(&mut self) -> Result<(), PluginError>;

    /// Closes the sink. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the close fails.
    fn close(&mut self) -> Result<(), PluginError>;

    /// Lifecycle hook invoked before the run's main loop.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] to abort the run before any row is read.
    fn on_start(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Lifecycle hook invoked after the run, on success and failure paths.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`]; errors here are logged, never raised.
    fn on_complete(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}
