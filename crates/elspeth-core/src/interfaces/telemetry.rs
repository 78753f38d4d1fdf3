// crates/elspeth-core/src/interfaces/telemetry.rs
// ============================================================================
// Module: ELSPETH Telemetry Interface
// Description: Telemetry events, exporter contract, and emit handle.
// Purpose: Define the observability surface layered on top of the audit trail.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Telemetry is separate from the audit store: it powers dashboards and
//! alerting, never the legal record. Events are emitted only after the
//! corresponding recorder write succeeded, and emission must never crash the
//! pipeline; exporter failures are isolated and counted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::pipeline::TelemetryGranularity;
use crate::core::records::RunStatus;
use crate::core::states::CallStatus;
use crate::core::states::CallType;
use crate::core::states::TokenOutcome;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Events
// ============================================================================

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A run began.
    RunStarted {
        /// Run identifier.
        run_id: RunId,
        /// Run start timestamp.
        started_at: Timestamp,
    },
    /// A run finalized.
    RunCompleted {
        /// Run identifier.
        run_id: RunId,
        /// Terminal run status.
        status: RunStatus,
        /// Total rows processed.
        rows_processed: u64,
        /// Run end timestamp.
        completed_at: Timestamp,
    },
    /// A token reached its terminal outcome.
    TokenOutcomeRecorded {
        /// Run identifier.
        run_id: RunId,
        /// Token identifier.
        token_id: TokenId,
        /// Terminal disposition.
        outcome: TokenOutcome,
    },
    /// An external call was recorded.
    ExternalCallCompleted {
        /// Run identifier.
        run_id: RunId,
        /// Owning node state.
        state_id: StateId,
        /// Call index within the state.
        call_index: u32,
        /// Kind of external request.
        call_type: CallType,
        /// Call outcome.
        status: CallStatus,
        /// Round-trip latency in milliseconds.
        latency_ms: u64,
    },
}

impl TelemetryEvent {
    /// Returns the minimum granularity at which this event is emitted.
    #[must_use]
    pub const fn granularity_floor(&self) -> TelemetryGranularity {
        match self {
            Self::RunStarted {
                ..
            }
            | Self::RunCompleted {
                ..
            } => TelemetryGranularity::Minimal,
            Self::TokenOutcomeRecorded {
                ..
            } => TelemetryGranularity::Standard,
            Self::ExternalCallCompleted {
                ..
            } => TelemetryGranularity::Full,
        }
    }
}

// ============================================================================
// SECTION: Exporter Contract
// ============================================================================

/// Exporter errors.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Exporter reported an error.
    #[error("telemetry exporter error: {0}")]
    Export(String),
}

/// Telemetry event exporter.
///
/// Exporters run on the telemetry export thread; a failing exporter is
/// counted and isolated, never propagated to the pipeline.
pub trait TelemetryExporter: Send {
    /// Returns the exporter's stable name for failure accounting.
    fn name(&self) -> &str;

    /// Exports one event.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when the export fails; the manager counts
    /// the failure and continues.
    fn export(&mut self, event: &TelemetryEvent) -> Result<(), ExporterError>;

    /// Closes the exporter, flushing any buffered output.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when the close fails.
    fn close(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Emit Handle
// ============================================================================

/// Cloneable handle for emitting telemetry events from the pipeline thread
/// and from plugin contexts.
///
/// # Invariants
/// - Emission never blocks beyond the configured backpressure policy and
///   never returns an error to the caller.
#[derive(Clone)]
pub struct TelemetrySender {
    /// Emission callback installed by the telemetry manager.
    emit: Arc<dyn Fn(TelemetryEvent) + Send + Sync>,
}

impl TelemetrySender {
    /// Creates a sender from an emission callback.
    #[must_use]
    pub fn new(emit: Arc<dyn Fn(TelemetryEvent) + Send + Sync>) -> Self {
        Self {
            emit,
        }
    }

    /// Emits one event under the manager's backpressure policy.
    pub fn emit(&self, event: TelemetryEvent) {
        (self.emit)(event);
    }
}

impl fmt::Debug for TelemetrySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TelemetrySender")
    }
}
