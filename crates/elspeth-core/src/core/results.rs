// crates/elspeth-core/src/core/results.rs
// ============================================================================
// Module: ELSPETH Result Types
// Description: Sum types for expected row-level outcomes.
// Purpose: Model source items, transform results, routing actions, and row results.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Expected outcomes travel as values, not as errors: a transform that cannot
//! parse an LLM response returns [`TransformResult::Error`], a gate returns a
//! [`RoutingAction`], and the processor reports each terminal disposition as a
//! [`RowResult`]. Errors proper are reserved for engine invariants and for
//! retryable external faults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::TokenId;
use crate::core::states::TokenOutcome;

// ============================================================================
// SECTION: Row Data
// ============================================================================

/// A row as it flows through the pipeline: a JSON object.
pub type RowData = serde_json::Map<String, Value>;

// ============================================================================
// SECTION: Error Disposition
// ============================================================================

/// Where data-level failures go: dropped on the floor or diverted to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDisposition {
    /// Drop the row without an audit row beyond the failure record itself.
    Discard,
    /// Divert the row to the named sink.
    Route(SinkName),
}

impl ErrorDisposition {
    /// Returns the destination label persisted in error records.
    #[must_use]
    pub fn destination_label(&self) -> &str {
        match self {
            Self::Discard => "discard",
            Self::Route(sink) => sink.as_str(),
        }
    }
}

// ============================================================================
// SECTION: Source Items
// ============================================================================

/// One item yielded by a source iterator.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    /// Row that passed source-side validation.
    Valid {
        /// Validated row data.
        row: RowData,
    },
    /// Row that failed source-side validation.
    Quarantined {
        /// Raw row data as observed.
        row: RowData,
        /// Validation error message.
        error: String,
        /// Configured destination for the failed row.
        destination: ErrorDisposition,
    },
}

// ============================================================================
// SECTION: Transform Results
// ============================================================================

/// Result of one transform invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    /// Transform produced one output row.
    Success {
        /// Output row data.
        row: RowData,
    },
    /// Transform produced multiple output rows (expand).
    SuccessMulti {
        /// Output rows.
        rows: Vec<RowData>,
    },
    /// Transform failed at the data level.
    Error {
        /// Structured error detail.
        detail: Value,
        /// Whether the retry manager may re-attempt the operation.
        retryable: bool,
    },
}

impl TransformResult {
    /// Convenience constructor for a single-row success.
    #[must_use]
    pub const fn success(row: RowData) -> Self {
        Self::Success {
            row,
        }
    }

    /// Convenience constructor for a terminal (non-retryable) error.
    #[must_use]
    pub const fn error(detail: Value) -> Self {
        Self::Error {
            detail,
            retryable: false,
        }
    }

    /// Convenience constructor for a retryable error.
    #[must_use]
    pub const fn retryable_error(detail: Value) -> Self {
        Self::Error {
            detail,
            retryable: true,
        }
    }
}

// ============================================================================
// SECTION: Routing Actions
// ============================================================================

/// Decision a gate returns for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAction {
    /// Token continues down the spine.
    Continue,
    /// Token is routed to the named sink.
    RouteToSink {
        /// Destination sink.
        sink: SinkName,
    },
    /// Token forks into one child per branch (COPY mode).
    ForkToPaths {
        /// Branch labels, one child each.
        branches: Vec<BranchName>,
    },
    /// Token is dropped by gate decision; recorded as a failed disposition
    /// because silent drops are forbidden.
    Discard,
}

/// Result of one gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResult {
    /// Routing decision.
    pub action: RoutingAction,
    /// Decision reason, hashed into the routing event.
    pub reason: Value,
}

// ============================================================================
// SECTION: Row Results
// ============================================================================

/// One terminal disposition produced by the row processor.
#[derive(Debug, Clone, PartialEq)]
pub struct RowResult {
    /// Token that reached this disposition.
    pub token_id: TokenId,
    /// Terminal outcome.
    pub outcome: TokenOutcome,
    /// Destination sink for sink-bound outcomes.
    pub sink: Option<SinkName>,
    /// Final row data for sink-bound outcomes.
    pub final_data: Option<RowData>,
    /// Error detail for failed, quarantined, or error-routed outcomes.
    pub error: Option<Value>,
}

impl RowResult {
    /// Reports whether this result carries a row destined for a sink.
    #[must_use]
    pub const fn is_sink_bound(&self) -> bool {
        self.sink.is_some()
    }
}
