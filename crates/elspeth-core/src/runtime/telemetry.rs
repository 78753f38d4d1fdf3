// crates/elspeth-core/src/runtime/telemetry.rs
// ============================================================================
// Module: ELSPETH Telemetry Manager
// Description: Bounded-queue background export of telemetry events.
// Purpose: Ship observability events without ever blocking the audit path
//          beyond the configured backpressure policy.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! One background thread drains a bounded queue into the configured
//! exporters. `BLOCK` mode waits (bounded by a timeout) for queue space;
//! `DROP` mode never slows the pipeline and counts overflow. Shutdown signals
//! rejection of new events, enqueues a single sentinel, and joins the thread;
//! the thread drains everything ahead of the sentinel and closes the
//! exporters before exiting. Dropped events surface as one aggregate warning
//! per hundred, not one warning each.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::core::pipeline::BackpressureMode;
use crate::core::pipeline::TelemetryGranularity;
use crate::core::pipeline::TelemetryRuntimeConfig;
use crate::core::pipeline::internal_defaults;
use crate::interfaces::telemetry::TelemetryEvent;
use crate::interfaces::telemetry::TelemetryExporter;
use crate::interfaces::telemetry::TelemetrySender;

// ============================================================================
// SECTION: Health Snapshot
// ============================================================================

/// Point-in-time telemetry health counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHealth {
    /// Events offered to the manager after granularity filtering.
    pub events_submitted: u64,
    /// Events exported by at least one exporter.
    pub events_emitted: u64,
    /// Events lost to overflow, shutdown, or total exporter failure.
    pub events_dropped: u64,
    /// Export failure counts per exporter name.
    pub exporter_failures: BTreeMap<String, u64>,
    /// Current queue depth.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_maxsize: usize,
    /// True when export was attempted and no exporter ever succeeded.
    pub total_exporter_failure: bool,
}

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// Queue item: an event or the shutdown sentinel.
enum QueueItem {
    /// Telemetry event to export.
    Event(TelemetryEvent),
    /// Shutdown sentinel; everything ahead of it has been drained.
    Sentinel,
}

/// Guarded queue state.
struct QueueState {
    /// Pending items in FIFO order.
    items: VecDeque<QueueItem>,
    /// Set once shutdown begins; new events are rejected.
    shutdown: bool,
}

/// Guarded health counters, written by both threads.
#[derive(Debug, Default)]
struct HealthCounters {
    /// Events offered after granularity filtering.
    submitted: u64,
    /// Events exported by at least one exporter.
    emitted: u64,
    /// Events lost to overflow, shutdown, or total exporter failure.
    dropped: u64,
    /// Export attempts that reached the exporter loop.
    export_attempts: u64,
    /// Failure counts per exporter name.
    exporter_failures: BTreeMap<String, u64>,
}

/// State shared between the pipeline thread and the export thread.
struct TelemetryCore {
    /// Runtime configuration.
    config: TelemetryRuntimeConfig,
    /// Guarded queue.
    queue: Mutex<QueueState>,
    /// Signals consumers that the queue is non-empty.
    not_empty: Condvar,
    /// Signals producers that the queue has space.
    not_full: Condvar,
    /// Guarded health counters.
    health: Mutex<HealthCounters>,
}

impl TelemetryCore {
    /// Acquires the queue lock, recovering from poisoning.
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Acquires the health lock, recovering from poisoning.
    fn lock_health(&self) -> MutexGuard<'_, HealthCounters> {
        match self.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Counts one dropped event, warning once per aggregation window.
    fn count_drop(&self) {
        let dropped = {
            let mut health = self.lock_health();
            health.dropped += 1;
            health.dropped
        };
        if dropped % internal_defaults::TELEMETRY_DROP_WARN_EVERY == 0 {
            warn!(events_dropped = dropped, "telemetry events dropped");
        }
    }

    /// Offers one event under the configured backpressure policy.
    fn handle_event(&self, event: TelemetryEvent) {
        if !self.config.enabled
            || self.config.granularity == TelemetryGranularity::Off
            || event.granularity_floor() > self.config.granularity
        {
            return;
        }
        self.lock_health().submitted += 1;

        let mut queue = self.lock_queue();
        if queue.shutdown {
            drop(queue);
            self.count_drop();
            return;
        }
        match self.config.backpressure_mode {
            BackpressureMode::Drop => {
                if queue.items.len() >= self.config.queue_size {
                    drop(queue);
                    self.count_drop();
                    return;
                }
                queue.items.push_back(QueueItem::Event(event));
            }
            BackpressureMode::Block => {
                let deadline = std::time::Instant::now()
                    + Duration::from_millis(internal_defaults::TELEMETRY_BLOCK_TIMEOUT_MS);
                while queue.items.len() >= self.config.queue_size && !queue.shutdown {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        drop(queue);
                        self.count_drop();
                        return;
                    }
                    let (guard, _timeout) =
                        match self.not_full.wait_timeout(queue, deadline - now) {
                            Ok(result) => result,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                    queue = guard;
                }
                if queue.shutdown {
                    drop(queue);
                    self.count_drop();
                    return;
                }
                queue.items.push_back(QueueItem::Event(event));
            }
        }
        drop(queue);
        self.not_empty.notify_one();
    }

    /// Pops the next queue item, blocking until one is available.
    fn pop(&self) -> QueueItem {
        let mut queue = self.lock_queue();
        loop {
            if let Some(item) = queue.items.pop_front() {
                drop(queue);
                self.not_full.notify_one();
                return item;
            }
            queue = match self.not_empty.wait(queue) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Builds a health snapshot.
    fn snapshot(&self) -> TelemetryHealth {
        let queue_depth = self.lock_queue().items.len();
        let health = self.lock_health();
        TelemetryHealth {
            events_submitted: health.submitted,
            events_emitted: health.emitted,
            events_dropped: health.dropped,
            exporter_failures: health.exporter_failures.clone(),
            queue_depth,
            queue_maxsize: self.config.queue_size,
            total_exporter_failure: health.export_attempts > 0 && health.emitted == 0,
        }
    }
}

// ============================================================================
// SECTION: Telemetry Manager
// ============================================================================

/// Owner of the telemetry queue and export thread.
///
/// # Invariants
/// - `events_emitted + events_dropped <= events_submitted`; the gap is
///   in-flight queue depth.
/// - Events are enqueued only after the corresponding recorder write
///   succeeded (enforced at call sites).
pub struct TelemetryManager {
    /// Shared queue and counters.
    core: Arc<TelemetryCore>,
    /// Export thread handle, taken at close.
    thread: Option<thread::JoinHandle<()>>,
    /// Set once `close` has run.
    closed: bool,
}

impl TelemetryManager {
    /// Creates a manager and starts its export thread.
    #[must_use]
    pub fn new(
        config: TelemetryRuntimeConfig,
        exporters: Vec<Box<dyn TelemetryExporter>>,
    ) -> Self {
        let core = Arc::new(TelemetryCore {
            config,
            queue: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            health: Mutex::new(HealthCounters::default()),
        });
        let thread_core = Arc::clone(&core);
        let thread = thread::Builder::new()
            .name("elspeth-telemetry".to_string())
            .spawn(move || export_loop(&thread_core, exporters))
            .ok();
        Self {
            core,
            thread,
            closed: false,
        }
    }

    /// Returns a cloneable emit handle for the pipeline and plugins.
    #[must_use]
    pub fn sender(&self) -> TelemetrySender {
        let core = Arc::clone(&self.core);
        TelemetrySender::new(Arc::new(move |event| core.handle_event(event)))
    }

    /// Offers one event under the configured backpressure policy.
    pub fn handle_event(&self, event: TelemetryEvent) {
        self.core.handle_event(event);
    }

    /// Returns a point-in-time health snapshot.
    #[must_use]
    pub fn health(&self) -> TelemetryHealth {
        self.core.snapshot()
    }

    /// Shuts down: rejects new events, enqueues the sentinel, joins the
    /// export thread (which drains the queue and closes exporters), and
    /// returns the final health snapshot.
    pub fn close(&mut self) -> TelemetryHealth {
        if !self.closed {
            self.closed = true;
            {
                let mut queue = self.core.lock_queue();
                queue.shutdown = true;
                // The sentinel bypasses the capacity bound: it must always
                // fit or the export thread would block on an empty future.
                queue.items.push_back(QueueItem::Sentinel);
            }
            self.core.not_empty.notify_one();
            self.core.not_full.notify_all();
            if let Some(handle) = self.thread.take() {
                let _joined: Result<(), _> = handle.join().map_err(|_| ());
            }
        }
        self.core.snapshot()
    }
}

impl Drop for TelemetryManager {
    fn drop(&mut self) {
        let _health = self.close();
    }
}

// ============================================================================
// SECTION: Export Thread
// ============================================================================

/// Export thread body: drain until the sentinel, then close exporters.
fn export_loop(core: &TelemetryCore, mut exporters: Vec<Box<dyn TelemetryExporter>>) {
    loop {
        match core.pop() {
            QueueItem::Event(event) => {
                let mut any_success = exporters.is_empty();
                {
                    let mut health = core.lock_health();
                    health.export_attempts += 1;
                }
                for exporter in &mut exporters {
                    match exporter.export(&event) {
                        Ok(()) => any_success = true,
                        Err(error) => {
                            let mut health = core.lock_health();
                            *health
                                .exporter_failures
                                .entry(exporter.name().to_string())
                                .or_insert(0) += 1;
                            drop(health);
                            warn!(exporter = exporter.name(), %error, "telemetry export failed");
                        }
                    }
                }
                if any_success {
                    core.lock_health().emitted += 1;
                } else {
                    core.count_drop();
                }
            }
            QueueItem::Sentinel => break,
        }
    }
    for exporter in &mut exporters {
        if let Err(error) = exporter.close() {
            warn!(exporter = exporter.name(), %error, "telemetry exporter close failed");
        }
    }
}
