// crates/elspeth-core/src/lib.rs
// ============================================================================
// Module: ELSPETH Core Library
// Description: Public API surface for the ELSPETH pipeline engine.
// Purpose: Expose core types, interfaces, and the runtime engine.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! ELSPETH is a row-oriented data pipeline engine with a legally-credible
//! audit trail (the Landscape). Every observable event, from each row seen to each
//! transform attempt, each external call, each routing decision, each sink
//! sink write, is persisted so an operator can answer "what happened to row X
//! and why" from the stored record alone. The engine is backend-agnostic and
//! integrates through explicit interfaces rather than concrete types.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::*;

pub use interfaces::AuditedCallOutcome;
pub use interfaces::AuditedCallRecorder;
pub use interfaces::Determinism;
pub use interfaces::ExporterError;
pub use interfaces::GatePlugin;
pub use interfaces::NewCall;
pub use interfaces::PluginContext;
pub use interfaces::PluginError;
pub use interfaces::Recorder;
pub use interfaces::RecorderError;
pub use interfaces::SinkPlugin;
pub use interfaces::SourcePlugin;
pub use interfaces::SourceStream;
pub use interfaces::TelemetryEvent;
pub use interfaces::TelemetryExporter;
pub use interfaces::TelemetrySender;
pub use interfaces::TransformPlugin;
pub use runtime::EngineError;
pub use runtime::ExecutionGraph;
pub use runtime::GraphError;
pub use runtime::InMemoryRecorder;
pub use runtime::Orchestrator;
pub use runtime::PipelineDefinition;
pub use runtime::RunCounters;
pub use runtime::RunMode;
pub use runtime::RunResult;
pub use runtime::SinkBinding;
pub use runtime::TelemetryManager;
pub use runtime::Token;
pub use runtime::TransformBinding;
