// crates/elspeth-core/src/interfaces/clients.rs
// ============================================================================
// Module: ELSPETH Audited Call Discipline
// Description: Allocate-perform-record-then-telemetry helper for external calls.
// Purpose: Make the call-audit ordering impossible to get wrong in plugins.
// Dependencies: crate::core, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! Every external call made from a plugin follows one discipline: allocate a
//! call index, perform the request, record the call, and only then, if and
//! only if the recorder write succeeded, emit the telemetry event. This
//! helper packages that ordering. An exempt mode (no recorder, no telemetry)
//! exists for construction-time probes; in the execution path both are set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::states::CallStatus;
use crate::core::states::CallType;
use crate::interfaces::recorder::NewCall;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::recorder::RecorderError;
use crate::interfaces::telemetry::TelemetryEvent;
use crate::interfaces::telemetry::TelemetrySender;

// ============================================================================
// SECTION: Call Outcome
// ============================================================================

/// Outcome of one audited external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditedCallOutcome {
    /// Response payload on success, error detail on failure.
    pub response: Result<Value, Value>,
    /// Allocated call index; `None` in exempt mode.
    pub call_index: Option<u32>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
}

impl AuditedCallOutcome {
    /// Reports whether the underlying call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.response.is_ok()
    }
}

// ============================================================================
// SECTION: Audited Call Recorder
// ============================================================================

/// Helper enforcing the audit-then-telemetry discipline for external calls.
pub struct AuditedCallRecorder {
    /// Recorder handle; `None` selects exempt mode.
    recorder: Option<Arc<dyn Recorder>>,
    /// Node state the calls belong to.
    state_id: Option<StateId>,
    /// Run identifier for telemetry payloads.
    run_id: Option<RunId>,
    /// Telemetry emit handle.
    telemetry: Option<TelemetrySender>,
}

impl AuditedCallRecorder {
    /// Creates a recorder-backed instance for the execution path.
    #[must_use]
    pub const fn new(recorder: Arc<dyn Recorder>, state_id: StateId) -> Self {
        Self {
            recorder: Some(recorder),
            state_id: Some(state_id),
            run_id: None,
            telemetry: None,
        }
    }

    /// Attaches telemetry emission for recorded calls.
    #[must_use]
    pub fn with_telemetry(mut self, run_id: RunId, telemetry: TelemetrySender) -> Self {
        self.run_id = Some(run_id);
        self.telemetry = Some(telemetry);
        self
    }

    /// Creates an exempt instance that performs calls without recording.
    #[must_use]
    pub const fn exempt() -> Self {
        Self {
            recorder: None,
            state_id: None,
            run_id: None,
            telemetry: None,
        }
    }

    /// Performs one external call under the audit discipline.
    ///
    /// `perform` returns `Ok(response)` or `Err(error detail)`; either way
    /// the call is recorded before the outcome is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the audit write fails; the telemetry
    /// event is then not emitted and the pipeline must treat the call as
    /// unrecorded.
    pub fn record_call<F>(
        &self,
        call_type: CallType,
        request: &Value,
        perform: F,
    ) -> Result<AuditedCallOutcome, RecorderError>
    where
        F: FnOnce() -> Result<Value, Value>,
    {
        let (Some(recorder), Some(state_id)) = (self.recorder.as_ref(), self.state_id.as_ref())
        else {
            let started = Instant::now();
            let response = perform();
            return Ok(AuditedCallOutcome {
                response,
                call_index: None,
                latency_ms: elapsed_ms(started),
            });
        };

        let call_index = recorder.allocate_call_index(state_id)?;
        let started = Instant::now();
        let response = perform();
        let latency_ms = elapsed_ms(started);

        let (status, response_data, error) = match &response {
            Ok(value) => (CallStatus::Success, Some(value), None),
            Err(detail) => (CallStatus::Error, None, Some(detail)),
        };
        recorder.record_call(&NewCall {
            state_id,
            call_index,
            call_type,
            status,
            request_data: request,
            response_data,
            error,
            latency_ms,
            request_ref: None,
            response_ref: None,
        })?;

        if let (Some(run_id), Some(telemetry)) = (self.run_id.as_ref(), self.telemetry.as_ref()) {
            telemetry.emit(TelemetryEvent::ExternalCallCompleted {
                run_id: run_id.clone(),
                state_id: state_id.clone(),
                call_index,
                call_type,
                status,
                latency_ms,
            });
        }

        Ok(AuditedCallOutcome {
            response,
            call_index: Some(call_index),
            latency_ms,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns whole milliseconds elapsed since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
