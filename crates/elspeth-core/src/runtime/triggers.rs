// crates/elspeth-core/src/runtime/triggers.rs
// ============================================================================
// Module: ELSPETH Trigger Evaluator
// Description: Flush triggers for aggregation buffers.
// Purpose: Decide when an aggregation buffer flushes, and prove it fired for
//          a reason.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Three trigger kinds: COUNT (flush at N rows), TIME (flush after a duration
//! since first accept), SIZE (flush at B buffered bytes). The orchestrator
//! drives evaluation between rows and once at source exhaustion. A trigger
//! may only fire when at least one threshold actually holds; spurious firing
//! is a bug.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use crate::core::pipeline::TriggerSpec;

// ============================================================================
// SECTION: Trigger Evaluator
// ============================================================================

/// Evaluates one aggregation's flush trigger.
///
/// # Invariants
/// - `buffer_count` equals accepted minus flushed.
/// - `should_trigger` implies count, age, or size reached its threshold.
#[derive(Debug)]
pub struct TriggerEvaluator {
    /// Configured trigger.
    spec: TriggerSpec,
    /// Rows currently buffered.
    buffer_count: u64,
    /// Bytes currently buffered (canonical encoding size).
    buffer_bytes: u64,
    /// Instant of the first accept since the last flush.
    first_accept: Option<Instant>,
}

impl TriggerEvaluator {
    /// Creates an evaluator for a validated trigger spec.
    #[must_use]
    pub const fn new(spec: TriggerSpec) -> Self {
        Self {
            spec,
            buffer_count: 0,
            buffer_bytes: 0,
            first_accept: None,
        }
    }

    /// Records one accepted row of `bytes` canonical size.
    pub fn accept(&mut self, bytes: u64, now: Instant) {
        if self.first_accept.is_none() {
            self.first_accept = Some(now);
        }
        self.buffer_count += 1;
        self.buffer_bytes += bytes;
    }

    /// Returns the number of buffered rows.
    #[must_use]
    pub const fn buffer_count(&self) -> u64 {
        self.buffer_count
    }

    /// Reports whether the trigger condition holds at `now`.
    #[must_use]
    pub fn should_trigger(&self, now: Instant) -> bool {
        if self.buffer_count == 0 {
            return false;
        }
        match self.spec {
            TriggerSpec::Count {
                threshold,
            } => self.buffer_count >= threshold,
            TriggerSpec::Time {
                timeout_ms,
            } => self.first_accept.is_some_and(|first| {
                now.saturating_duration_since(first) >= Duration::from_millis(timeout_ms)
            }),
            TriggerSpec::Size {
                threshold_bytes,
            } => self.buffer_bytes >= threshold_bytes,
        }
    }

    /// Resets the evaluator after a flush and returns the flushed row count.
    pub fn flush(&mut self) -> u64 {
        let flushed = self.buffer_count;
        self.buffer_count = 0;
        self.buffer_bytes = 0;
        self.first_accept = None;
        flushed
    }
}
