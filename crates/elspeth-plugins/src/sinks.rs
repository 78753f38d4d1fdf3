// crates/elspeth-plugins/src/sinks.rs
// ============================================================================
// Module: Built-In Sinks
// Description: JSON-lines file sink and in-memory sink.
// Purpose: Write row batches and return artifact descriptors whose content
//          hashes are reproducible from the written payload.
// Dependencies: elspeth-core, serde, sha2 (via core hashing)
// ============================================================================

//! ## Overview
//! The file sink appends canonical JSON lines and hashes the bytes it wrote
//! after the write completes. The memory sink keeps rows in a shared buffer
//! and hashes the canonical payload computed before the insert, matching the
//! database-sink discipline. Empty batches return a valid descriptor with
//! `size_bytes = 0`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::canonical_json_bytes;
use elspeth_core::core::hashing::hash_bytes;
use elspeth_core::core::results::RowData;
use elspeth_core::core::states::ArtifactDescriptor;
use elspeth_core::interfaces::plugins::PluginContext;
use elspeth_core::interfaces::plugins::PluginError;
use elspeth_core::interfaces::plugins::SinkPlugin;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: JSON-Lines Sink
// ============================================================================

/// Options for [`JsonLinesSink`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonLinesSinkOptions {
    /// Output file path.
    pub path: PathBuf,
}

/// Sink appending one canonical JSON line per row.
pub struct JsonLinesSink {
    /// Output path for the artifact descriptor.
    path: PathBuf,
    /// Buffered append writer; dropped on close.
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Builds a JSON-lines sink from its options blob.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the options do not parse or the file
    /// cannot be opened.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: JsonLinesSinkOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("json_lines sink options: {err}")))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&options.path)
            .map_err(|err| {
                PluginError::Failed(format!("open {}: {err}", options.path.display()))
            })?;
        Ok(Self {
            path: options.path,
            writer: Some(BufWriter::new(file)),
        })
    }
}

impl SinkPlugin for JsonLinesSink {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PluginError::Failed("sink is closed".to_string()))?;
        let mut written: Vec<u8> = Vec::new();
        for row in rows {
            let line = canonical_json_bytes(row)
                .map_err(|err| PluginError::Failed(err.to_string()))?;
            written.extend_from_slice(&line);
            written.push(b'\n');
        }
        writer
            .write_all(&written)
            .and_then(|()| writer.flush())
            .map_err(|err| PluginError::Failed(format!("write {}: {err}", self.path.display())))?;
        // Hash of the written bytes, computed after the write completed.
        let content_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &written);
        Ok(ArtifactDescriptor {
            artifact_type: "file".to_string(),
            path_or_uri: self.path.display().to_string(),
            size_bytes: written.len() as u64,
            content_hash,
            metadata: Some(json!({"rows": rows.len()})),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|err| PluginError::Failed(err.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|err| PluginError::Failed(err.to_string()))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// Shared buffer handle for inspecting a memory sink's rows.
pub type MemorySinkBuffer = Arc<Mutex<Vec<RowData>>>;

/// Sink collecting rows into a shared in-process buffer.
pub struct MemorySink {
    /// Sink instance name.
    name: String,
    /// Shared row buffer.
    buffer: MemorySinkBuffer,
    /// Set once closed.
    closed: bool,
}

impl MemorySink {
    /// Creates a memory sink and returns it with its shared buffer.
    #[must_use]
    pub fn new(name: &str) -> (Self, MemorySinkBuffer) {
        let buffer: MemorySinkBuffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                buffer: Arc::clone(&buffer),
                closed: false,
            },
            buffer,
        )
    }
}

impl SinkPlugin for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError> {
        if self.closed {
            return Err(PluginError::Failed("sink is closed".to_string()));
        }
        // Database-sink discipline: hash the canonical payload computed
        // before the insert so intent stays auditable.
        let payload = canonical_json_bytes(&rows.to_vec())
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        let content_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &payload);
        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.extend(rows.iter().cloned());
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            path_or_uri: format!("memory://{}", self.name),
            size_bytes: payload.len() as u64,
            content_hash,
            metadata: Some(json!({"rows": rows.len()})),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginError> {
        self.closed = true;
        Ok(())
    }
}
