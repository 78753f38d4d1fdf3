// crates/elspeth-core/src/runtime/error.rs
// ============================================================================
// Module: ELSPETH Engine Errors
// Description: Fatal engine errors (Tier 1) for the execution path.
// Purpose: Give invariant violations one loud, typed exit route.
// Dependencies: crate::core, crate::interfaces, crate::runtime::graph
// ============================================================================

//! ## Overview
//! Engine errors crash the run. Data-level failures never appear here; they
//! travel as result values and are routed to error or quarantine sinks. What
//! does appear here: recorder failures, missing reserved edges, broken
//! coalesce lookups, sink write failures, and plugin faults that make the
//! pipeline unusable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::hashing::HashError;
use crate::core::identifiers::SinkName;
use crate::core::pipeline::PlanError;
use crate::interfaces::recorder::RecorderError;
use crate::runtime::graph::GraphError;

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Fatal engine errors.
///
/// # Invariants
/// - Any variant here ends the run with status `Failed`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audit store rejected or failed a write.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    /// The execution graph is invalid or a required lookup failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Pipeline configuration failed validation.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The source failed to open or yield.
    #[error("source error: {0}")]
    Source(String),
    /// A plugin lifecycle hook failed before the run started.
    #[error("plugin start hook failed: {0}")]
    StartHook(String),
    /// A sink write failed; sinks are the durability boundary.
    #[error("sink '{sink}' write failed: {message}")]
    SinkWrite {
        /// Failing sink name.
        sink: SinkName,
        /// Failure message.
        message: String,
    },
    /// An engine invariant was violated.
    #[error("engine invariant violated: {0}")]
    Invariant(String),
}
