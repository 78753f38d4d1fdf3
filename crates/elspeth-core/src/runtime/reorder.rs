// crates/elspeth-core/src/runtime/reorder.rs
// ============================================================================
// Module: ELSPETH Row Reorder Buffer
// Description: FIFO-release reorder buffer for batch-capable transforms.
// Purpose: Let a transform process rows concurrently while the engine observes
//          strictly sequential, submission-ordered behavior.
// Dependencies: std::sync
// ============================================================================

//! ## Overview
//! A batch-capable transform admits rows into this buffer, processes them on
//! its own workers, and releases results in submission order. `submit` blocks
//! when `max_pending` rows are in flight (backpressure); `wait_for_release`
//! blocks until every predecessor has been released. Wakeups are targeted:
//! each release waiter parks on its own sequence, and every state change
//! issues exactly one `notify_one` to the single thread that can make
//! progress, so completions never fan out to unrelated waiters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

// ============================================================================
// SECTION: Ticket
// ============================================================================

/// Submission ticket identifying one admitted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    /// Returns the monotonic submission sequence of this ticket.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

// ============================================================================
// SECTION: Buffer State
// ============================================================================

/// Mutable buffer state guarded by the mutex.
#[derive(Debug)]
struct BufferState<T> {
    /// Next sequence to hand out on submit.
    next_submit: u64,
    /// Next sequence eligible for release.
    next_release: u64,
    /// Completed results awaiting their turn, keyed by sequence.
    completed: BTreeMap<u64, T>,
    /// Number of submitted-but-unreleased rows.
    in_flight: usize,
    /// Parked release waiters keyed by the sequence they wait for.
    release_waiters: BTreeMap<u64, Arc<Condvar>>,
}

// ============================================================================
// SECTION: Row Reorder Buffer
// ============================================================================

/// Reorder buffer releasing completed results in submission order.
///
/// # Invariants
/// - Release order equals submission order over any interleaving of
///   `complete` calls.
/// - At most `max_pending` rows are in flight at once.
/// - Every wakeup is a `notify_one` aimed at the one thread whose turn
///   arrived: the waiter for the sequence that just became releasable, or
///   one blocked submitter when a slot frees.
#[derive(Debug)]
pub struct RowReorderBuffer<T> {
    /// Guarded buffer state.
    state: Mutex<BufferState<T>>,
    /// Signals one blocked submitter when a slot frees.
    not_full: Condvar,
    /// In-flight cap enforced by `submit`.
    max_pending: usize,
}

impl<T> RowReorderBuffer<T> {
    /// Creates a buffer with the given in-flight cap.
    ///
    /// A zero cap is treated as one: the buffer must always admit at least
    /// one row or `submit` would never return.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                next_submit: 0,
                next_release: 0,
                completed: BTreeMap::new(),
                in_flight: 0,
                release_waiters: BTreeMap::new(),
            }),
            not_full: Condvar::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Admits one row, blocking while the buffer is full.
    #[must_use]
    pub fn submit(&self) -> Ticket {
        let mut state = self.lock();
        while state.in_flight >= self.max_pending {
            state = match self.not_full.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        let seq = state.next_submit;
        state.next_submit += 1;
        state.in_flight += 1;
        Ticket(seq)
    }

    /// Records the result for a ticket and, when that ticket just became
    /// releasable, wakes exactly its waiter.
    pub fn complete(&self, ticket: Ticket, result: T) {
        let mut state = self.lock();
        state.completed.insert(ticket.sequence(), result);
        let front_waiter = if ticket.sequence() == state.next_release {
            state.release_waiters.get(&ticket.sequence()).map(Arc::clone)
        } else {
            None
        };
        drop(state);
        if let Some(waiter) = front_waiter {
            waiter.notify_one();
        }
    }

    /// Blocks until every predecessor of `ticket` has been released, then
    /// releases and returns this ticket's result. The release hands one
    /// `notify_one` to the next-in-line waiter whose result already landed,
    /// and one to a blocked submitter for the freed slot.
    #[must_use]
    pub fn wait_for_release(&self, ticket: Ticket) -> T {
        let seq = ticket.sequence();
        let mut state = self.lock();
        loop {
            if state.next_release == seq
                && let Some(result) = state.completed.remove(&seq)
            {
                state.next_release += 1;
                state.in_flight -= 1;
                state.release_waiters.remove(&seq);
                let successor = state.next_release;
                let next_waiter = if state.completed.contains_key(&successor) {
                    state.release_waiters.get(&successor).map(Arc::clone)
                } else {
                    None
                };
                drop(state);
                self.not_full.notify_one();
                if let Some(waiter) = next_waiter {
                    waiter.notify_one();
                }
                return result;
            }
            let waiter =
                Arc::clone(state.release_waiters.entry(seq).or_insert_with(|| {
                    Arc::new(Condvar::new())
                }));
            state = match waiter.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Returns the number of submitted-but-unreleased rows.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Acquires the state lock, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
