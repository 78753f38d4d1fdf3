// crates/elspeth-core/src/interfaces/mod.rs
// ============================================================================
// Module: ELSPETH Interfaces
// Description: Backend-agnostic contracts for recording, plugins, and telemetry.
// Purpose: Define the surfaces through which the engine meets the outside world.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how ELSPETH integrates with stores, plugins, and
//! observability backends without embedding backend-specific details. The
//! engine depends on these traits, never on concrete types.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod clients;
pub mod plugins;
pub mod recorder;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use clients::AuditedCallOutcome;
pub use clients::AuditedCallRecorder;
pub use plugins::Determinism;
pub use plugins::GatePlugin;
pub use plugins::PluginContext;
pub use plugins::PluginError;
pub use plugins::SinkPlugin;
pub use plugins::SourcePlugin;
pub use plugins::SourceStream;
pub use plugins::TransformPlugin;
pub use recorder::NewCall;
pub use recorder::Recorder;
pub use recorder::RecorderError;
pub use telemetry::ExporterError;
pub use telemetry::TelemetryEvent;
pub use telemetry::TelemetryExporter;
pub use telemetry::TelemetrySender;
