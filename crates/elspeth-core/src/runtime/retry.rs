// crates/elspeth-core/src/runtime/retry.rs
// ============================================================================
// Module: ELSPETH Retry and Throttle
// Description: Exponential backoff with jitter and AIMD dispatch throttling.
// Purpose: Bound retry behavior for retryable external faults and capacity errors.
// Dependencies: crate::core, rand
// ============================================================================

//! ## Overview
//! Two independent mechanisms live here. The retry manager re-attempts
//! retryable operations with exponentially growing, jittered delays; each
//! attempt is recorded as its own node state by the caller. The AIMD throttle
//! paces external-call dispatch: multiplicative backoff on capacity errors,
//! additive recovery on success, with a wall-clock budget per row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;

use crate::core::pipeline::RetryPolicy;
use crate::core::pipeline::ThrottleConfig;

// ============================================================================
// SECTION: Retry Manager
// ============================================================================

/// Applies a validated [`RetryPolicy`] to retryable operations.
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Validated policy.
    policy: RetryPolicy,
}

impl RetryManager {
    /// Creates a retry manager from a validated policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
        }
    }

    /// Returns the configured maximum attempt count.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Computes the backoff delay before retry `k` (1-indexed, after the
    /// initial try), without jitter.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.policy.exponential_base.powi(exponent.min(63).cast_signed());
        let raw = (self.policy.base_delay_ms as f64) * factor;
        let capped = raw.min(self.policy.max_delay_ms as f64);
        Duration::from_millis(duration_millis(capped))
    }

    /// Computes the jittered delay before retry `k`.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.policy.jitter <= 0.0 {
            return base;
        }
        let low = 1.0 - self.policy.jitter;
        let factor = rand::thread_rng().gen_range(low ..= 1.0);
        Duration::from_millis(duration_millis(base.as_millis() as f64 * factor))
    }

    /// Sleeps for the jittered delay before retry `k`.
    pub fn wait(&self, retry: u32) {
        let delay = self.delay(retry);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Converts a non-negative float millisecond count to `u64`, saturating.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "Value is clamped to [0, u64::MAX] before conversion."
)]
fn duration_millis(millis: f64) -> u64 {
    if millis <= 0.0 {
        0
    } else if millis >= u64::MAX as f64 {
        u64::MAX
    } else {
        millis as u64
    }
}

// ============================================================================
// SECTION: AIMD Throttle
// ============================================================================

/// Mutable throttle state shared across pooled workers.
#[derive(Debug)]
struct ThrottleState {
    /// Current dispatch delay in milliseconds.
    delay_ms: f64,
}

/// AIMD dispatch throttle for external calls.
///
/// # Invariants
/// - `delay()` stays within `[min_dispatch_delay_ms, max_dispatch_delay_ms]`.
#[derive(Debug)]
pub struct AimdThrottle {
    /// Validated throttle configuration.
    config: ThrottleConfig,
    /// Shared mutable delay state.
    state: Mutex<ThrottleState>,
}

impl AimdThrottle {
    /// Creates a throttle from a validated configuration.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        let initial = config.min_dispatch_delay_ms as f64;
        Self {
            config,
            state: Mutex::new(ThrottleState {
                delay_ms: initial,
            }),
        }
    }

    /// Returns the current dispatch delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        let delay_ms = match self.state.lock() {
            Ok(state) => state.delay_ms,
            Err(poisoned) => poisoned.into_inner().delay_ms,
        };
        Duration::from_millis(duration_millis(delay_ms))
    }

    /// Applies multiplicative backoff after a capacity error.
    pub fn on_capacity_error(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let floor = (self.config.min_dispatch_delay_ms as f64).max(1.0);
        let grown = (state.delay_ms.max(floor)) * self.config.backoff_multiplier;
        state.delay_ms = grown.min(self.config.max_dispatch_delay_ms as f64);
    }

    /// Applies additive recovery after a success.
    pub fn on_success(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let lowered = state.delay_ms - self.config.recovery_step_ms as f64;
        state.delay_ms = lowered.max(self.config.min_dispatch_delay_ms as f64);
    }

    /// Returns the per-row capacity-retry wall-clock budget.
    #[must_use]
    pub const fn capacity_budget(&self) -> Duration {
        Duration::from_millis(self.config.max_capacity_retry_ms)
    }

    /// Reports whether the capacity budget is exhausted for work that began
    /// at `started`.
    #[must_use]
    pub fn budget_exhausted(&self, started: Instant) -> bool {
        started.elapsed() >= self.capacity_budget()
    }
}
