// crates/elspeth-core/src/core/states.rs
// ============================================================================
// Module: ELSPETH Execution Records
// Description: Node states, routing events, calls, outcomes, and error records.
// Purpose: Provide stable, serializable types for the behavioral half of the Landscape.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! These records capture what happened during execution: every node visit,
//! every routing decision, every external call, every terminal disposition,
//! and the companion error rows for failures and quarantines. Together with
//! the structural records they are sufficient to answer "what happened to row
//! X and why" without consulting anything outside the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::CallId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::records::EdgeMode;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Node States
// ============================================================================

/// Completion status of one node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// Visit is open.
    Running,
    /// Visit completed successfully.
    Completed,
    /// Visit failed.
    Failed,
}

/// Persisted record of one token visiting one node.
///
/// # Invariants
/// - Unique per `(token_id, node_id, attempt)`.
/// - `status` is `Running` from open until close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateRecord {
    /// State identifier.
    pub state_id: StateId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Visiting token.
    pub token_id: TokenId,
    /// Visited node.
    pub node_id: NodeId,
    /// Position in the pipeline walk (0 for the source visit).
    pub step_index: u32,
    /// Retry counter, 1-based.
    pub attempt: u32,
    /// Visit status.
    pub status: NodeStateStatus,
    /// Visit open timestamp.
    pub started_at: Timestamp,
    /// Visit close timestamp.
    pub completed_at: Option<Timestamp>,
    /// Canonical hash of the input data.
    pub input_hash: HashDigest,
    /// Canonical hash of the output data, when the visit produced any.
    pub output_hash: Option<HashDigest>,
    /// Error detail for failed visits.
    pub error_json: Option<Value>,
    /// Visit duration in milliseconds, set at close.
    pub duration_ms: Option<u64>,
}

// ============================================================================
// SECTION: Routing Events
// ============================================================================

/// Persisted record of a token traveling along one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEventRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// State whose owner made the routing decision.
    pub state_id: StateId,
    /// Edge traveled.
    pub edge_id: EdgeId,
    /// Traversal mode.
    pub mode: EdgeMode,
    /// Canonical hash of the decision reason.
    pub reason_hash: HashDigest,
}

// ============================================================================
// SECTION: External Calls
// ============================================================================

/// Kind of external request recorded against a node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Large-language-model request.
    Llm,
    /// HTTP request.
    Http,
    /// SQL statement.
    Sql,
    /// Filesystem operation.
    Filesystem,
}

/// Outcome status of an external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Call succeeded.
    Success,
    /// Call failed.
    Error,
}

/// Persisted record of one external call.
///
/// # Invariants
/// - Unique per `(state_id, call_index)`; duplicates are recorder errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call identifier.
    pub call_id: CallId,
    /// Owning node state.
    pub state_id: StateId,
    /// 0-based index of the call within the state.
    pub call_index: u32,
    /// Kind of external request.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// Canonical hash of the request payload.
    pub request_hash: HashDigest,
    /// Optional payload-store reference for the request body.
    pub request_ref: Option<String>,
    /// Canonical hash of the response payload, when one was received.
    pub response_hash: Option<HashDigest>,
    /// Optional payload-store reference for the response body.
    pub response_ref: Option<String>,
    /// Error detail for failed calls.
    pub error_json: Option<Value>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Record timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Terminal Outcomes
// ============================================================================

/// Terminal disposition of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOutcome {
    /// Token reached the default sink via the spine.
    Completed,
    /// Token was routed to a named sink.
    Routed,
    /// Token produced fork children and stopped itself.
    Forked,
    /// Token was absorbed into an aggregation buffer.
    ConsumedInBatch,
    /// Token was consumed by a successful coalesce merge.
    Coalesced,
    /// Token was diverted to quarantine at the source boundary.
    Quarantined,
    /// Token failed without reaching a sink.
    Failed,
}

/// Persisted terminal outcome of a token.
///
/// # Invariants
/// - At most one per token; recording a second outcome is a recorder error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcomeRecord {
    /// Token identifier.
    pub token_id: TokenId,
    /// Terminal disposition.
    pub outcome: TokenOutcome,
    /// Error detail accompanying failed or quarantined outcomes.
    pub error_json: Option<Value>,
    /// Record timestamp.
    pub recorded_at: Timestamp,
}

// ============================================================================
// SECTION: Error Records
// ============================================================================

/// Persisted record of a source-boundary validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// Error identifier.
    pub error_id: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Row that failed validation.
    pub row_id: RowId,
    /// Node at which validation failed.
    pub node_id: NodeId,
    /// Schema mode active during validation.
    pub schema_mode: String,
    /// Validation error message.
    pub error: String,
    /// Configured destination for the failed row.
    pub destination: String,
}

/// Persisted record of a transform-level data failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformErrorRecord {
    /// Error identifier.
    pub error_id: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node state during which the failure occurred.
    pub state_id: StateId,
    /// Token that failed.
    pub token_id: TokenId,
    /// Transform node identifier.
    pub transform_id: NodeId,
    /// Structured error detail.
    pub error_details_json: Value,
    /// Applied error disposition (sink name or "discard").
    pub destination: String,
}

// ============================================================================
// SECTION: Sink Artifacts
// ============================================================================

/// Descriptor a sink returns after writing a batch.
///
/// # Invariants
/// - `content_hash` is SHA-256 of the written bytes (file sinks) or of the
///   canonical payload computed before the write (database sinks).
/// - Empty batches yield `size_bytes = 0` and the hash of an empty payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Artifact kind ("file", "database", "memory", ...).
    pub artifact_type: String,
    /// Location of the written artifact.
    pub path_or_uri: String,
    /// Size of the written payload in bytes.
    pub size_bytes: u64,
    /// Content hash of the written payload.
    pub content_hash: HashDigest,
    /// Optional sink-specific metadata.
    pub metadata: Option<Value>,
}

/// Persisted record of one sink write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkArtifactRecord {
    /// Artifact identifier.
    pub artifact_id: String,
    /// Node state opened for the sink write.
    pub state_id: StateId,
    /// Sink name from the pipeline configuration.
    pub sink_name: SinkName,
    /// Artifact kind.
    pub artifact_type: String,
    /// Location of the written artifact.
    pub path_or_uri: String,
    /// Size of the written payload in bytes.
    pub size_bytes: u64,
    /// Content hash of the written payload.
    pub content_hash: HashDigest,
    /// Optional sink-specific metadata.
    pub metadata_json: Option<Value>,
}
