// crates/elspeth-core/src/core/lineage.rs
// ============================================================================
// Module: ELSPETH Lineage Read Model
// Description: Reconstructed token history and resume-state types.
// Purpose: Shape the read side of the Landscape for explain and resume.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The Landscape's read side reconstructs a token's complete history: its
//! source row, parent chain, node visits, routing decisions, external calls,
//! artifacts, and terminal outcome. The same read side supplies the resume
//! cursor for interrupted runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RowId;
use crate::core::records::RowRecord;
use crate::core::records::TokenRecord;
use crate::core::states::CallRecord;
use crate::core::states::NodeStateRecord;
use crate::core::states::RoutingEventRecord;
use crate::core::states::SinkArtifactRecord;
use crate::core::states::TokenOutcomeRecord;
use crate::core::states::TransformErrorRecord;
use crate::core::states::ValidationErrorRecord;

// ============================================================================
// SECTION: Token Lineage
// ============================================================================

/// Complete reconstructed history of one token.
///
/// # Invariants
/// - `parents` is ordered root-first; empty for root tokens.
/// - `node_states` is ordered by `(step_index, attempt)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLineage {
    /// The token itself.
    pub token: TokenRecord,
    /// Source row the token carries.
    pub row: RowRecord,
    /// Parent chain, root-first.
    pub parents: Vec<TokenRecord>,
    /// Node visits in walk order.
    pub node_states: Vec<NodeStateRecord>,
    /// Routing decisions made against this token's states.
    pub routing_events: Vec<RoutingEventRecord>,
    /// External calls recorded against this token's states.
    pub calls: Vec<CallRecord>,
    /// Sink artifacts whose write state belongs to this token.
    pub artifacts: Vec<SinkArtifactRecord>,
    /// Terminal outcome, when recorded.
    pub outcome: Option<TokenOutcomeRecord>,
    /// Source-boundary validation errors for the row.
    pub validation_errors: Vec<ValidationErrorRecord>,
    /// Transform-level error records for this token.
    pub transform_errors: Vec<TransformErrorRecord>,
}

// ============================================================================
// SECTION: Resume State
// ============================================================================

/// Per-row progress extracted from the Landscape for resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowProgress {
    /// Previously persisted row identifier.
    pub row_id: RowId,
    /// Highest completed step index for the row's latest root token.
    pub last_completed_step: u32,
}

/// Resume cursor reconstructed from a previous run's audit trail.
///
/// # Invariants
/// - Rows with index `< cursor` reached a terminal outcome and are skipped,
///   as are indices in `completed`.
/// - Rows in `partial` were recorded but not terminally resolved; they replay
///   under a fresh root token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResumeState {
    /// First row index that has not reached a terminal outcome.
    pub cursor: u64,
    /// Terminally resolved row indices at or beyond the cursor.
    pub completed: BTreeSet<u64>,
    /// Recorded-but-unfinished rows keyed by row index.
    pub partial: BTreeMap<u64, RowProgress>,
}
