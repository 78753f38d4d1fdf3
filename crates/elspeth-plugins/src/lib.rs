// crates/elspeth-plugins/src/lib.rs
// ============================================================================
// Module: ELSPETH Plugins Library
// Description: Built-in plugin set, registry, and pipeline builder.
// Purpose: Expose the sources, transforms, gates, and sinks every deployment
//          gets without writing custom plugins.
// Dependencies: elspeth-config, elspeth-core
// ============================================================================

//! ## Overview
//! Built-in plugins cover the common cases: JSON-lines files in and out,
//! deterministic field transforms, condition gates over row JSON, and an
//! in-memory sink for tests. The registry resolves settings names to these
//! constructors, and the builder assembles a complete, validated pipeline
//! definition from loaded settings.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod builder;
pub mod condition;
pub mod gate;
pub mod registry;
pub mod sinks;
pub mod source;
pub mod transforms;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builder::BuildError;
pub use builder::build_definition;
pub use builder::build_definition_with;
pub use builder::build_exporters;
pub use condition::Condition;
pub use condition::ConditionError;
pub use gate::ConditionGate;
pub use registry::PluginRegistry;
pub use registry::RegistryError;
pub use sinks::JsonLinesSink;
pub use sinks::MemorySink;
pub use sinks::MemorySinkBuffer;
pub use source::JsonLinesSource;
pub use source::StaticSource;
pub use transforms::FieldTransform;
pub use transforms::Passthrough;
