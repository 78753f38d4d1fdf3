// crates/elspeth-plugins/src/registry.rs
// ============================================================================
// Module: Plugin Registry
// Description: Name-to-constructor resolution for built-in plugins.
// Purpose: Turn settings plugin names into live plugin instances.
// Dependencies: elspeth-core, crate plugins
// ============================================================================

//! ## Overview
//! The registry resolves the `plugin` names appearing in settings files to
//! built-in constructors. Unknown names fail closed at build time, before a
//! run record exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::results::ErrorDisposition;
use elspeth_core::interfaces::plugins::SinkPlugin;
use elspeth_core::interfaces::plugins::SourcePlugin;
use elspeth_core::interfaces::plugins::TransformPlugin;
use serde_json::Value;
use thiserror::Error;

use crate::sinks::JsonLinesSink;
use crate::sinks::MemorySink;
use crate::source::JsonLinesSource;
use crate::source::StaticSource;
use crate::transforms::FieldTransform;
use crate::transforms::Passthrough;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry resolution errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No plugin registered under the requested name.
    #[error("unknown {kind} plugin '{name}'")]
    Unknown {
        /// Plugin kind (source, transform, sink).
        kind: &'static str,
        /// Requested plugin name.
        name: String,
    },
    /// The plugin constructor rejected its options.
    #[error("plugin '{name}' construction failed: {message}")]
    Construction {
        /// Requested plugin name.
        name: String,
        /// Constructor failure message.
        message: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Resolver from settings plugin names to built-in constructors.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginRegistry;

impl PluginRegistry {
    /// Returns the built-in registry.
    #[must_use]
    pub const fn builtin() -> Self {
        Self
    }

    /// Builds a source plugin.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for unknown names or rejected options.
    pub fn build_source(
        &self,
        plugin: &str,
        options: &Value,
        on_validation_failure: ErrorDisposition,
    ) -> Result<Box<dyn SourcePlugin>, RegistryError> {
        match plugin {
            "json_lines" => JsonLinesSource::from_options(options, on_validation_failure)
                .map(|source| Box::new(source) as Box<dyn SourcePlugin>)
                .map_err(|err| construction(plugin, &err.to_string())),
            "static" => StaticSource::from_options(options, on_validation_failure)
                .map(|source| Box::new(source) as Box<dyn SourcePlugin>)
                .map_err(|err| construction(plugin, &err.to_string())),
            other => Err(RegistryError::Unknown {
                kind: "source",
                name: other.to_string(),
            }),
        }
    }

    /// Builds a transform plugin.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for unknown names or rejected options.
    pub fn build_transform(
        &self,
        plugin: &str,
        label: &str,
        options: &Value,
    ) -> Result<Box<dyn TransformPlugin>, RegistryError> {
        match plugin {
            "field" => FieldTransform::from_options(label, options)
                .map(|transform| Box::new(transform) as Box<dyn TransformPlugin>)
                .map_err(|err| construction(plugin, &err.to_string())),
            "passthrough" => Ok(Box::new(Passthrough::new(label))),
            other => Err(RegistryError::Unknown {
                kind: "transform",
                name: other.to_string(),
            }),
        }
    }

    /// Builds a sink plugin.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for unknown names or rejected options.
    pub fn build_sink(
        &self,
        plugin: &str,
        name: &str,
        options: &Value,
    ) -> Result<Box<dyn SinkPlugin>, RegistryError> {
        match plugin {
            "json_lines" => JsonLinesSink::from_options(options)
                .map(|sink| Box::new(sink) as Box<dyn SinkPlugin>)
                .map_err(|err| construction(plugin, &err.to_string())),
            "memory" => {
                let (sink, _buffer) = MemorySink::new(name);
                Ok(Box::new(sink))
            }
            other => Err(RegistryError::Unknown {
                kind: "sink",
                name: other.to_string(),
            }),
        }
    }
}

/// Builds a construction error.
fn construction(name: &str, message: &str) -> RegistryError {
    RegistryError::Construction {
        name: name.to_string(),
        message: message.to_string(),
    }
}
