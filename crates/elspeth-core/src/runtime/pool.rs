// crates/elspeth-core/src/runtime/pool.rs
// ============================================================================
// Module: ELSPETH Pooled Executor
// Description: Bounded concurrent dispatch with submission-ordered output.
// Purpose: Execute a batch of external calls on a worker pool while emitting
//          results in exactly the order they were submitted.
// Dependencies: crate::runtime::retry, std::sync, std::thread
// ============================================================================

//! ## Overview
//! `execute_batch` fans a batch out to at most `pool_size` workers. Results
//! land in a slot buffer indexed by submission sequence, so outputs and
//! inputs have equal length and equal ordering regardless of completion
//! order. A single-flight lock serializes concurrent batches: sequence slots
//! are per-batch, and interleaving two batches through one buffer would mix
//! their results. Capacity errors are retried inside the worker under the
//! AIMD throttle until the per-item wall-clock budget runs out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;

use crate::runtime::retry::AimdThrottle;

// ============================================================================
// SECTION: Call Failure
// ============================================================================

/// Classification of a failed pooled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailureKind {
    /// Provider capacity error (HTTP 429/503/529 or analog); retryable under
    /// the AIMD budget.
    Capacity,
    /// Non-capacity failure; surfaced to the caller immediately.
    Fatal,
}

/// Failure detail for one pooled call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    /// Failure classification.
    pub kind: CallFailureKind,
    /// Structured error detail.
    pub detail: Value,
}

impl CallFailure {
    /// Creates a capacity failure.
    #[must_use]
    pub const fn capacity(detail: Value) -> Self {
        Self {
            kind: CallFailureKind::Capacity,
            detail,
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub const fn fatal(detail: Value) -> Self {
        Self {
            kind: CallFailureKind::Fatal,
            detail,
        }
    }
}

// ============================================================================
// SECTION: Pooled Executor
// ============================================================================

/// Bounded-concurrency batch executor with strict submission-order output.
///
/// # Invariants
/// - `execute_batch` outputs have the same length and ordering as inputs.
/// - Only one batch runs at a time per executor.
pub struct PooledExecutor {
    /// Maximum concurrent workers.
    pool_size: usize,
    /// Shared dispatch throttle.
    throttle: Arc<AimdThrottle>,
    /// Single-flight lock serializing batches.
    batch_lock: Mutex<()>,
}

impl PooledExecutor {
    /// Creates an executor with the given pool size and throttle.
    ///
    /// A zero pool size is treated as one.
    #[must_use]
    pub fn new(pool_size: usize, throttle: Arc<AimdThrottle>) -> Self {
        Self {
            pool_size: pool_size.max(1),
            throttle,
            batch_lock: Mutex::new(()),
        }
    }

    /// Returns the configured pool size.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Executes a batch of items concurrently, returning results in
    /// submission order.
    pub fn execute_batch<I, O, F>(&self, items: &[I], process: F) -> Vec<Result<O, CallFailure>>
    where
        I: Sync,
        O: Send,
        F: Fn(&I) -> Result<O, CallFailure> + Send + Sync,
    {
        let flight = lock_ignoring_poison(&self.batch_lock);
        let total = items.len();
        if total == 0 {
            drop(flight);
            return Vec::new();
        }

        let mut slots: Vec<Option<Result<O, CallFailure>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        let slots = Mutex::new(slots);
        let next = AtomicUsize::new(0);
        let workers = self.pool_size.min(total);

        thread::scope(|scope| {
            for _ in 0 .. workers {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= total {
                            break;
                        }
                        let result = self.dispatch_one(&items[index], &process);
                        let mut guard = lock_ignoring_poison(&slots);
                        guard[index] = Some(result);
                    }
                });
            }
        });

        drop(flight);
        lock_ignoring_poison(&slots)
            .drain(..)
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(CallFailure::fatal(json!({"error": "pooled worker lost its result"})))
                })
            })
            .collect()
    }

    /// Dispatches one item, retrying capacity errors under the AIMD budget.
    fn dispatch_one<I, O, F>(&self, item: &I, process: &F) -> Result<O, CallFailure>
    where
        F: Fn(&I) -> Result<O, CallFailure>,
    {
        let started = Instant::now();
        loop {
            let delay = self.throttle.delay();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match process(item) {
                Ok(output) => {
                    self.throttle.on_success();
                    return Ok(output);
                }
                Err(failure) if failure.kind == CallFailureKind::Capacity => {
                    self.throttle.on_capacity_error();
                    if self.throttle.budget_exhausted(started) {
                        return Err(CallFailure::fatal(json!({
                            "error": "capacity retry budget exhausted",
                            "last": failure.detail,
                        })));
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Acquires a mutex, recovering from poisoning.
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
