// crates/elspeth-core/src/interfaces/recorder.rs
// ============================================================================
// Module: ELSPETH Recorder Interface
// Description: Write-side contract for the Landscape audit store.
// Purpose: Define the operations every audit-store backend must support.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The recorder is the only way the engine writes to the Landscape. Every
//! call is synchronous: it does not return until the store has durably
//! accepted the record. Failures are loud: a recorder error means
//! the audit trail can no longer be trusted, and the pipeline crashes rather
//! than continue unrecorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::records::EdgeMode;
use crate::core::records::EdgeRecord;
use crate::core::records::NodeRecord;
use crate::core::records::NodeType;
use crate::core::records::RowRecord;
use crate::core::records::RunRecord;
use crate::core::records::RunStatus;
use crate::core::records::TokenRecord;
use crate::core::results::RowData;
use crate::core::states::ArtifactDescriptor;
use crate::core::states::CallRecord;
use crate::core::states::CallStatus;
use crate::core::states::CallType;
use crate::core::states::NodeStateRecord;
use crate::core::states::NodeStateStatus;
use crate::core::states::RoutingEventRecord;
use crate::core::states::SinkArtifactRecord;
use crate::core::states::TokenOutcome;
use crate::core::states::TokenOutcomeRecord;
use crate::core::states::TransformErrorRecord;
use crate::core::states::ValidationErrorRecord;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Recorder errors.
///
/// # Invariants
/// - `Duplicate` and `Constraint` indicate engine bugs (double recording or a
///   missing referent) and are fatal to the run.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// A uniqueness constraint was violated.
    #[error("recorder uniqueness violation: {0}")]
    Duplicate(String),
    /// A referenced record does not exist.
    #[error("recorder constraint violation: {0}")]
    Constraint(String),
    /// The store rejected or failed the write.
    #[error("recorder storage error: {0}")]
    Storage(String),
    /// A payload could not be canonically hashed.
    #[error("recorder hash error: {0}")]
    Hash(#[from] crate::core::hashing::HashError),
}

// ============================================================================
// SECTION: Call Payload
// ============================================================================

/// Payload describing one external call to record.
#[derive(Debug, Clone, Copy)]
pub struct NewCall<'a> {
    /// Node state the call belongs to.
    pub state_id: &'a StateId,
    /// Allocated 0-based call index within the state.
    pub call_index: u32,
    /// Kind of external request.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// Request payload, hashed canonically by the recorder.
    pub request_data: &'a Value,
    /// Response payload, when one was received.
    pub response_data: Option<&'a Value>,
    /// Error detail for failed calls.
    pub error: Option<&'a Value>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Optional payload-store reference for the request body.
    pub request_ref: Option<&'a str>,
    /// Optional payload-store reference for the response body.
    pub response_ref: Option<&'a str>,
}

// ============================================================================
// SECTION: Recorder Trait
// ============================================================================

/// Write-side interface to the Landscape audit store.
///
/// Implementations must be safe to call from pooled worker threads for
/// `allocate_call_index` and `record_call`; every other operation is invoked
/// from the single pipeline thread.
pub trait Recorder: Send + Sync {
    /// Creates a run record and returns it with status `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn begin_run(&self, config: &Value, canonical_version: &str)
    -> Result<RunRecord, RecorderError>;

    /// Finalizes a run with its terminal status and end timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run is unknown or the write fails.
    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), RecorderError>;

    /// Registers an execution-graph node.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn register_node(
        &self,
        run_id: &RunId,
        plugin_name: &str,
        plugin_version: &str,
        node_type: NodeType,
        config: &Value,
        schema: &Value,
    ) -> Result<NodeRecord, RecorderError>;

    /// Registers an execution-graph edge.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Duplicate`] when `(from, label)` already
    /// exists, or another variant when the write fails.
    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: EdgeMode,
    ) -> Result<EdgeRecord, RecorderError>;

    /// Persists a source row on first observation.
    ///
    /// Idempotent on `(run_id, source_node_id, row_index)`: re-recording the
    /// same row returns the existing record.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        data: &RowData,
    ) -> Result<RowRecord, RecorderError>;

    /// Creates a token for a persisted row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Constraint`] when the row (or parent token)
    /// does not exist.
    fn create_token(
        &self,
        row_id: &RowId,
        parent_token_id: Option<&TokenId>,
        branch_name: Option<&BranchName>,
    ) -> Result<TokenRecord, RecorderError>;

    /// Opens a node state for a token visit.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Duplicate`] when `(token, node, attempt)`
    /// already exists, or another variant when the write fails.
    fn begin_node_state(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        step_index: u32,
        input_data: &Value,
        attempt: u32,
    ) -> Result<NodeStateRecord, RecorderError>;

    /// Closes a node state with its terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the state is unknown or the write fails.
    fn complete_node_state(
        &self,
        state_id: &StateId,
        status: NodeStateStatus,
        output_data: Option<&Value>,
        error: Option<&Value>,
        duration_ms: u64,
    ) -> Result<(), RecorderError>;

    /// Records a token traveling along an edge.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Constraint`] when the state or edge does not
    /// exist.
    fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: EdgeMode,
        reason: &Value,
    ) -> Result<RoutingEventRecord, RecorderError>;

    /// Allocates the next monotonic call index for a state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Constraint`] when the state does not exist.
    fn allocate_call_index(&self, state_id: &StateId) -> Result<u32, RecorderError>;

    /// Records one external call.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Duplicate`] when `(state_id, call_index)` is
    /// already recorded; double recording is a bug, not a retry.
    fn record_call(&self, call: &NewCall<'_>) -> Result<CallRecord, RecorderError>;

    /// Records a token's terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Duplicate`] when the token already has an
    /// outcome.
    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: TokenOutcome,
        error: Option<&Value>,
    ) -> Result<TokenOutcomeRecord, RecorderError>;

    /// Records a source-boundary validation failure.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_validation_error(
        &self,
        run_id: &RunId,
        row_id: &RowId,
        node_id: &NodeId,
        schema_mode: &str,
        error: &str,
        destination: &str,
    ) -> Result<ValidationErrorRecord, RecorderError>;

    /// Records a transform-level data failure.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_transform_error(
        &self,
        run_id: &RunId,
        state_id: &StateId,
        token_id: &TokenId,
        transform_id: &NodeId,
        error_details: &Value,
        destination: &str,
    ) -> Result<TransformErrorRecord, RecorderError>;

    /// Records a sink artifact descriptor against a sink-write state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_sink_artifact(
        &self,
        state_id: &StateId,
        sink_name: &SinkName,
        descriptor: &ArtifactDescriptor,
    ) -> Result<SinkArtifactRecord, RecorderError>;
}
