// crates/elspeth-core/src/runtime/exporters.rs
// ============================================================================
// Module: ELSPETH Built-In Telemetry Exporters
// Description: Log and JSON-lines file exporters.
// Purpose: Give every deployment a working telemetry target without plugins.
// Dependencies: crate::interfaces, serde_json, tracing
// ============================================================================

//! ## Overview
//! Two built-in exporters: `log` forwards events through `tracing`, and
//! `file` appends one canonical JSON line per event. Both are intentionally
//! small; anything heavier belongs in a dedicated exporter implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::interfaces::telemetry::ExporterError;
use crate::interfaces::telemetry::TelemetryEvent;
use crate::interfaces::telemetry::TelemetryExporter;

// ============================================================================
// SECTION: Log Exporter
// ============================================================================

/// Exporter forwarding events to the `tracing` log stream.
#[derive(Debug, Default)]
pub struct LogExporter;

impl LogExporter {
    /// Creates a log exporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TelemetryExporter for LogExporter {
    fn name(&self) -> &str {
        "log"
    }

    fn export(&mut self, event: &TelemetryEvent) -> Result<(), ExporterError> {
        let rendered = serde_json::to_string(event)
            .map_err(|err| ExporterError::Export(err.to_string()))?;
        info!(event = %rendered, "telemetry");
        Ok(())
    }
}

// ============================================================================
// SECTION: File Exporter
// ============================================================================

/// Exporter appending one JSON line per event to a file.
#[derive(Debug)]
pub struct FileExporter {
    /// Buffered append writer.
    writer: BufWriter<File>,
}

impl FileExporter {
    /// Opens (or creates) the target file for appending.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ExporterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| ExporterError::Export(format!("open {}: {err}", path.display())))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl TelemetryExporter for FileExporter {
    fn name(&self) -> &str {
        "file"
    }

    fn export(&mut self, event: &TelemetryEvent) -> Result<(), ExporterError> {
        let rendered = serde_json::to_string(event)
            .map_err(|err| ExporterError::Export(err.to_string()))?;
        writeln!(self.writer, "{rendered}")
            .map_err(|err| ExporterError::Export(err.to_string()))
    }

    fn close(&mut self) -> Result<(), ExporterError> {
        self.writer.flush().map_err(|err| ExporterError::Export(err.to_string()))
    }
}
