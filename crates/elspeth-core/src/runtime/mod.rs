// crates/elspeth-core/src/runtime/mod.rs
// ============================================================================
// Module: ELSPETH Runtime
// Description: Execution engine: graph, tokens, retry, pooling, coalesce,
//              processing, orchestration, and telemetry.
// Purpose: Provide the single canonical execution path for pipeline runs.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The runtime is the single canonical execution path for ELSPETH. State
//! mutation happens on one orchestrator thread; concurrency exists only at
//! the plugin boundary (pooled external calls, row-level batching) and in the
//! telemetry export thread, all behind strict ordering disciplines.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod coalesce;
pub mod error;
pub mod exporters;
pub mod graph;
pub mod memory;
pub mod orchestrator;
pub mod pool;
pub mod processor;
pub mod reorder;
pub mod retry;
pub mod telemetry;
pub mod tokens;
pub mod triggers;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use coalesce::CoalesceExecutor;
pub use coalesce::CoalesceResolution;
pub use coalesce::FailedCoalesce;
pub use coalesce::MergedCoalesce;
pub use error::EngineError;
pub use exporters::FileExporter;
pub use exporters::LogExporter;
pub use graph::ExecutionGraph;
pub use graph::GraphError;
pub use graph::GraphNodeIds;
pub use memory::InMemoryRecorder;
pub use orchestrator::Orchestrator;
pub use orchestrator::PipelineDefinition;
pub use orchestrator::RunCounters;
pub use orchestrator::RunMode;
pub use orchestrator::RunResult;
pub use orchestrator::SinkBinding;
pub use orchestrator::TransformBinding;
pub use pool::CallFailure;
pub use pool::CallFailureKind;
pub use pool::PooledExecutor;
pub use processor::AggregationFlush;
pub use processor::AggregationRuntime;
pub use processor::GateRuntime;
pub use processor::RowProcessor;
pub use processor::TransformRuntime;
pub use reorder::RowReorderBuffer;
pub use reorder::Ticket;
pub use retry::AimdThrottle;
pub use retry::RetryManager;
pub use telemetry::TelemetryHealth;
pub use telemetry::TelemetryManager;
pub use tokens::Token;
pub use tokens::TokenManager;
pub use triggers::TriggerEvaluator;
