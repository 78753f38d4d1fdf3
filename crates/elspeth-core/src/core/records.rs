// crates/elspeth-core/src/core/records.rs
// ============================================================================
// Module: ELSPETH Graph Records
// Description: Persisted run, node, edge, row, and token records.
// Purpose: Provide stable, serializable types for the structural half of the Landscape.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! These records describe the persisted execution graph and the rows and
//! tokens flowing through it. They are written once by the recorder and read
//! back by lineage queries; the engine never mutates a persisted record apart
//! from run finalization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Reserved Edge Labels
// ============================================================================

/// Edge label used on the continue-mode spine.
pub const CONTINUE_LABEL: &str = "continue";

/// Reserved label for the source-to-quarantine DIVERT edge.
pub const QUARANTINE_LABEL: &str = "__quarantine__";

/// Returns the reserved DIVERT label for the Nth spine transform's error edge.
#[must_use]
pub fn error_label(transform_index: usize) -> String {
    format!("__error_{transform_index}__")
}

/// Reports whether a label is reserved for engine-generated DIVERT edges.
#[must_use]
pub fn is_reserved_label(label: &str) -> bool {
    label == QUARANTINE_LABEL || (label.starts_with("__error_") && label.ends_with("__"))
}

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is executing.
    Running,
    /// Run finished without an unhandled engine error.
    Completed,
    /// Run aborted with an unhandled engine error.
    Failed,
    /// Run was cancelled by the operator.
    Cancelled,
    /// Run was restarted from a checkpoint.
    Resumed,
}

/// Role of a node within the execution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Row producer.
    Source,
    /// Row mutator.
    Transform,
    /// Routing decision point.
    Gate,
    /// Fork-branch merge point.
    Coalesce,
    /// Row batcher with trigger-driven flush.
    Aggregation,
    /// Row consumer producing artifacts.
    Sink,
}

/// Mode a token travels along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Token continues on one path.
    Move,
    /// Token is duplicated across paths (fork children).
    Copy,
    /// Token left the main spine for a quarantine or error sink.
    Divert,
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Persisted record of one pipeline run.
///
/// # Invariants
/// - `config_hash` is the canonical hash of the effective configuration.
/// - `completed_at` is set exactly once, at finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Canonical hash of the effective configuration.
    pub config_hash: HashDigest,
    /// Canonicalization scheme version tag.
    pub canonical_version: String,
    /// Run start timestamp.
    pub started_at: Timestamp,
    /// Run end timestamp, set at finalization.
    pub completed_at: Option<Timestamp>,
    /// Current run status.
    pub status: RunStatus,
}

// ============================================================================
// SECTION: Node and Edge Records
// ============================================================================

/// Persisted record of one execution-graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node identifier.
    pub node_id: NodeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Plugin name implementing the node.
    pub plugin_name: String,
    /// Plugin version string.
    pub plugin_version: String,
    /// Node role in the graph.
    pub node_type: NodeType,
    /// Canonical hash of the node's configuration.
    pub config_hash: HashDigest,
    /// Declared input/output schema as a JSON blob.
    pub schema_json: Value,
}

/// Persisted record of one execution-graph edge.
///
/// # Invariants
/// - `label` is unique per `from_node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Origin node.
    pub from_node_id: NodeId,
    /// Destination node.
    pub to_node_id: NodeId,
    /// Edge label, unique per origin node.
    pub label: String,
    /// Default traversal mode for this edge.
    pub default_mode: EdgeMode,
}

// ============================================================================
// SECTION: Row and Token Records
// ============================================================================

/// Persisted record of one source row, written on first observation.
///
/// # Invariants
/// - Unique per `(run_id, source_node_id, row_index)`; re-recording is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row identifier.
    pub row_id: RowId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Source node that produced the row.
    pub source_node_id: NodeId,
    /// Ordinal of the row within the source.
    pub row_index: u64,
    /// Canonical hash of the row data.
    pub row_hash: HashDigest,
    /// Optional reference to an offloaded row payload.
    pub row_ref: Option<String>,
}

/// Persisted record of one token (a row-in-flight).
///
/// # Invariants
/// - The root token of a row has `parent_token_id = None` and no branch name.
/// - Fork children carry both a parent token and a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier.
    pub token_id: TokenId,
    /// Row this token carries.
    pub row_id: RowId,
    /// Parent token for fork and coalesce children.
    pub parent_token_id: Option<TokenId>,
    /// Branch label set on fork children.
    pub branch_name: Option<BranchName>,
}
