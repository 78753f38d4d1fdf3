// crates/elspeth-config/src/lib.rs
// ============================================================================
// Module: ELSPETH Configuration Library
// Description: Public API surface for settings loading and translation.
// Purpose: Expose the settings types and their from_settings constructors.
// Dependencies: elspeth-core, serde, toml
// ============================================================================

//! ## Overview
//! The configuration crate owns the user-facing settings surface (TOML) and
//! its fail-closed translation into the runtime configuration records the
//! engine trusts. Unknown keys are rejected everywhere; the exempt list is
//! the only sanctioned gap between settings fields and runtime fields.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CANONICAL_VERSION;
pub use config::ConfigError;
pub use config::EXEMPT_SETTINGS;
pub use config::ExporterSettings;
pub use config::GateSettings;
pub use config::MAX_SETTINGS_FILE_SIZE;
pub use config::PluginSettings;
pub use config::Settings;
pub use config::SinkSettings;
pub use config::TransformSettings;
pub use config::parse_disposition;
pub use config::parse_route_target;
pub use config::seconds_to_millis;
