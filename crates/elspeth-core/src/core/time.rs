// crates/elspeth-core/src/core/time.rs
// ============================================================================
// Module: ELSPETH Time Model
// Description: UTC millisecond timestamps for audit-trail records.
// Purpose: Provide one wall-clock representation for every persisted record.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Audit records carry UTC timestamps at millisecond precision. Everything
//! duration-shaped (latency, retry delay, coalesce timeout, trigger age) is
//! measured with `std::time::Instant` at call sites so that wall-clock drift
//! never affects ordering or timeout behavior; `Timestamp` exists only to be
//! written into the Landscape.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// UTC timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Monotonicity within a run is the recorder's concern, not this type's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self(now.unix_timestamp() * 1_000 + i64::from(now.millisecond()))
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the number of milliseconds elapsed since `earlier`, saturating
    /// at zero when the clock stepped backwards.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> u64 {
        let delta = self.0 - earlier.0;
        if delta < 0 { 0 } else { delta as u64 }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
