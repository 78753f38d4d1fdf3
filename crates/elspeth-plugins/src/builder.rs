// crates/elspeth-plugins/src/builder.rs
// ============================================================================
// Module: Pipeline Definition Builder
// Description: Settings-to-runtime translation with plugin resolution.
// Purpose: Assemble a validated PipelineDefinition from loaded settings.
// Dependencies: elspeth-config, elspeth-core, crate registry
// ============================================================================

//! ## Overview
//! The builder glues the three validated layers together: the structural plan
//! from the config crate, plugin instances from the registry, and the runtime
//! configuration records from the `from_settings` constructors. Everything
//! fails here, before a run record exists, or not at all (Tier 2).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use elspeth_config::CANONICAL_VERSION;
use elspeth_config::ConfigError;
use elspeth_config::Settings;
use elspeth_config::parse_disposition;
use elspeth_core::core::identifiers::SinkName;
use elspeth_core::core::pipeline::internal_defaults;
use elspeth_core::interfaces::plugins::GatePlugin;
use elspeth_core::interfaces::telemetry::TelemetryExporter;
use elspeth_core::runtime::exporters::FileExporter;
use elspeth_core::runtime::exporters::LogExporter;
use elspeth_core::runtime::orchestrator::PipelineDefinition;
use elspeth_core::runtime::orchestrator::SinkBinding;
use elspeth_core::runtime::orchestrator::TransformBinding;
use thiserror::Error;

use crate::condition::ConditionError;
use crate::gate::ConditionGate;
use crate::registry::PluginRegistry;
use crate::registry::RegistryError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline assembly errors (Tier 2).
#[derive(Debug, Error)]
pub enum BuildError {
    /// Settings-level validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Plugin resolution or construction failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A gate condition failed to parse.
    #[error(transparent)]
    Condition(#[from] ConditionError),
    /// A telemetry exporter could not be constructed.
    #[error("exporter construction failed: {0}")]
    Exporter(String),
}

// ============================================================================
// SECTION: Definition Builder
// ============================================================================

/// Assembles a pipeline definition using the built-in registry.
///
/// # Errors
///
/// Returns [`BuildError`] for any configuration or construction failure.
pub fn build_definition(settings: &Settings) -> Result<PipelineDefinition, BuildError> {
    build_definition_with(settings, PluginRegistry::builtin())
}

/// Assembles a pipeline definition using the given registry.
///
/// # Errors
///
/// Returns [`BuildError`] for any configuration or construction failure.
pub fn build_definition_with(
    settings: &Settings,
    registry: PluginRegistry,
) -> Result<PipelineDefinition, BuildError> {
    let plan = settings.pipeline_plan()?;
    let on_validation_failure = parse_disposition(&settings.source.on_validation_failure);

    let source = registry.build_source(
        &settings.datasource.plugin,
        &settings.datasource.options,
        on_validation_failure,
    )?;

    let mut transforms = Vec::with_capacity(settings.transforms.len());
    for (entry, transform) in plan.transforms.iter().zip(&settings.transforms) {
        let plugin =
            registry.build_transform(&transform.plugin, &entry.label, &transform.options)?;
        transforms.push(TransformBinding {
            plugin,
            options: transform.options.clone(),
        });
    }

    let mut gates: Vec<Box<dyn GatePlugin>> = Vec::with_capacity(settings.gates.len());
    for gate in &settings.gates {
        gates.push(Box::new(ConditionGate::from_settings(gate)?));
    }

    let mut sinks = BTreeMap::new();
    for (name, sink) in &settings.sinks {
        let plugin = registry.build_sink(&sink.plugin, name, &sink.options)?;
        sinks.insert(
            SinkName::new(name),
            SinkBinding {
                plugin,
                options: sink.options.clone(),
                flush_threshold: sink
                    .flush_threshold
                    .unwrap_or(internal_defaults::SINK_FLUSH_THRESHOLD),
            },
        );
    }

    Ok(PipelineDefinition {
        source,
        source_options: settings.datasource.options.clone(),
        transforms,
        gates,
        sinks,
        plan,
        retry: settings.retry_policy()?,
        throttle: settings.throttle_config()?,
        concurrency: settings.concurrency_config()?,
        telemetry: settings.telemetry_config()?,
        checkpoint: settings.checkpoint_config(),
        canonical_version: CANONICAL_VERSION.to_string(),
        settings_snapshot: settings.effective_snapshot()?,
    })
}

/// Builds the configured telemetry exporters.
///
/// # Errors
///
/// Returns [`BuildError::Exporter`] when a file exporter cannot be opened.
pub fn build_exporters(
    settings: &Settings,
) -> Result<Vec<Box<dyn TelemetryExporter>>, BuildError> {
    let mut exporters: Vec<Box<dyn TelemetryExporter>> = Vec::new();
    for exporter in &settings.telemetry.exporters {
        match exporter.kind.as_str() {
            "log" => exporters.push(Box::new(LogExporter::new())),
            "file" => {
                let path = exporter
                    .path
                    .as_ref()
                    .ok_or_else(|| BuildError::Exporter("file exporter without path".to_string()))?;
                let opened = FileExporter::open(&PathBuf::from(path))
                    .map_err(|err| BuildError::Exporter(err.to_string()))?;
                exporters.push(Box::new(opened));
            }
            other => {
                return Err(BuildError::Exporter(format!("unknown exporter type '{other}'")));
            }
        }
    }
    Ok(exporters)
}
