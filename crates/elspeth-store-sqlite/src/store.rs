// crates/elspeth-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Landscape Recorder
// Description: Durable Recorder backed by SQLite WAL.
// Purpose: Persist the full audit schema with enforced uniqueness and
//          foreign keys, surfacing violations as typed recorder errors.
// Dependencies: elspeth-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The Landscape's durable backend. Every write goes through one connection
//! guarded by a mutex, which also serializes `allocate_call_index` against
//! pooled worker threads. Uniqueness and foreign-key violations map to
//! [`RecorderError::Duplicate`] and [`RecorderError::Constraint`] so the
//! engine's Tier-1 handling can crash loudly instead of double-recording.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::HashAlgorithm;
use elspeth_core::core::hashing::HashDigest;
use elspeth_core::core::hashing::hash_canonical_json;
use elspeth_core::core::identifiers::BranchName;
use elspeth_core::core::identifiers::CallId;
use elspeth_core::core::identifiers::EdgeId;
use elspeth_core::core::identifiers::EventId;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RowId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::SinkName;
use elspeth_core::core::identifiers::StateId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::records::EdgeMode;
use elspeth_core::core::records::EdgeRecord;
use elspeth_core::core::records::NodeRecord;
use elspeth_core::core::records::NodeType;
use elspeth_core::core::records::RowRecord;
use elspeth_core::core::records::RunRecord;
use elspeth_core::core::records::RunStatus;
use elspeth_core::core::records::TokenRecord;
use elspeth_core::core::results::RowData;
use elspeth_core::core::states::ArtifactDescriptor;
use elspeth_core::core::states::CallRecord;
use elspeth_core::core::states::CallStatus;
use elspeth_core::core::states::CallType;
use elspeth_core::core::states::NodeStateRecord;
use elspeth_core::core::states::NodeStateStatus;
use elspeth_core::core::states::RoutingEventRecord;
use elspeth_core::core::states::SinkArtifactRecord;
use elspeth_core::core::states::TokenOutcome;
use elspeth_core::core::states::TokenOutcomeRecord;
use elspeth_core::core::states::TransformErrorRecord;
use elspeth_core::core::states::ValidationErrorRecord;
use elspeth_core::core::time::Timestamp;
use elspeth_core::interfaces::recorder::NewCall;
use elspeth_core::interfaces::recorder::Recorder;
use elspeth_core::interfaces::recorder::RecorderError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the Landscape.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Extended `SQLite` result code for UNIQUE constraint violations.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
/// Extended `SQLite` result code for PRIMARY KEY constraint violations.
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
/// Extended `SQLite` result code for FOREIGN KEY constraint violations.
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` Landscape store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Creates a config with default tuning for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

/// Maps a `rusqlite` error onto the recorder error taxonomy.
fn recorder_error(error: rusqlite::Error) -> RecorderError {
    if let rusqlite::Error::SqliteFailure(failure, ref message) = error {
        let rendered = message.clone().unwrap_or_else(|| failure.to_string());
        if failure.code == ErrorCode::ConstraintViolation {
            return match failure.extended_code {
                SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => {
                    RecorderError::Duplicate(rendered)
                }
                SQLITE_CONSTRAINT_FOREIGNKEY => RecorderError::Constraint(rendered),
                _ => RecorderError::Constraint(rendered),
            };
        }
    }
    RecorderError::Storage(error.to_string())
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Landscape DDL, applied once per database.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS id_sequence (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    run_id            TEXT PRIMARY KEY,
    config_hash       TEXT NOT NULL,
    canonical_version TEXT NOT NULL,
    started_at        INTEGER NOT NULL,
    completed_at      INTEGER,
    status            TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS nodes (
    node_id        TEXT PRIMARY KEY,
    run_id         TEXT NOT NULL REFERENCES runs(run_id),
    plugin_name    TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    node_type      TEXT NOT NULL,
    config_hash    TEXT NOT NULL,
    schema_json    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS edges (
    edge_id      TEXT PRIMARY KEY,
    run_id       TEXT NOT NULL REFERENCES runs(run_id),
    from_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    to_node_id   TEXT NOT NULL REFERENCES nodes(node_id),
    label        TEXT NOT NULL,
    default_mode TEXT NOT NULL,
    UNIQUE (from_node_id, label)
);
CREATE TABLE IF NOT EXISTS rows (
    row_id         TEXT PRIMARY KEY,
    run_id         TEXT NOT NULL REFERENCES runs(run_id),
    source_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_index      INTEGER NOT NULL,
    row_hash       TEXT NOT NULL,
    row_ref        TEXT,
    UNIQUE (run_id, source_node_id, row_index)
);
CREATE TABLE IF NOT EXISTS tokens (
    token_id        TEXT PRIMARY KEY,
    row_id          TEXT NOT NULL REFERENCES rows(row_id),
    parent_token_id TEXT REFERENCES tokens(token_id),
    branch_name     TEXT
);
CREATE TABLE IF NOT EXISTS node_states (
    state_id        TEXT PRIMARY KEY,
    run_id          TEXT NOT NULL REFERENCES runs(run_id),
    token_id        TEXT NOT NULL REFERENCES tokens(token_id),
    node_id         TEXT NOT NULL REFERENCES nodes(node_id),
    step_index      INTEGER NOT NULL,
    attempt         INTEGER NOT NULL,
    status          TEXT NOT NULL,
    started_at      INTEGER NOT NULL,
    completed_at    INTEGER,
    input_hash      TEXT NOT NULL,
    output_hash     TEXT,
    error_json      TEXT,
    duration_ms     INTEGER,
    next_call_index INTEGER NOT NULL DEFAULT 0,
    UNIQUE (token_id, node_id, attempt)
);
CREATE TABLE IF NOT EXISTS routing_events (
    event_id    TEXT PRIMARY KEY,
    state_id    TEXT NOT NULL REFERENCES node_states(state_id),
    edge_id     TEXT NOT NULL REFERENCES edges(edge_id),
    mode        TEXT NOT NULL,
    reason_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS calls (
    call_id       TEXT PRIMARY KEY,
    state_id      TEXT NOT NULL REFERENCES node_states(state_id),
    call_index    INTEGER NOT NULL,
    call_type     TEXT NOT NULL,
    status        TEXT NOT NULL,
    request_hash  TEXT NOT NULL,
    request_ref   TEXT,
    response_hash TEXT,
    response_ref  TEXT,
    error_json    TEXT,
    latency_ms    INTEGER NOT NULL,
    created_at    INTEGER NOT NULL,
    UNIQUE (state_id, call_index)
);
CREATE TABLE IF NOT EXISTS token_outcomes (
    token_id    TEXT PRIMARY KEY REFERENCES tokens(token_id),
    outcome     TEXT NOT NULL,
    error_json  TEXT,
    recorded_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS validation_errors (
    error_id    TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES runs(run_id),
    row_id      TEXT NOT NULL REFERENCES rows(row_id),
    node_id     TEXT NOT NULL REFERENCES nodes(node_id),
    schema_mode TEXT NOT NULL,
    error       TEXT NOT NULL,
    destination TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS transform_errors (
    error_id           TEXT PRIMARY KEY,
    run_id             TEXT NOT NULL REFERENCES runs(run_id),
    state_id           TEXT NOT NULL REFERENCES node_states(state_id),
    token_id           TEXT NOT NULL REFERENCES tokens(token_id),
    transform_id       TEXT NOT NULL REFERENCES nodes(node_id),
    error_details_json TEXT NOT NULL,
    destination        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sink_artifacts (
    artifact_id   TEXT PRIMARY KEY,
    state_id      TEXT NOT NULL REFERENCES node_states(state_id),
    sink_name     TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path_or_uri   TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL,
    content_hash  TEXT NOT NULL,
    metadata_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_row ON tokens(row_id);
CREATE INDEX IF NOT EXISTS idx_states_token ON node_states(token_id);
CREATE INDEX IF NOT EXISTS idx_events_state ON routing_events(state_id);
CREATE INDEX IF NOT EXISTS idx_calls_state ON calls(state_id);
CREATE INDEX IF NOT EXISTS idx_rows_run ON rows(run_id);
";

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed Landscape recorder.
///
/// # Invariants
/// - All access is serialized through one connection mutex; pooled workers
///   may call `allocate_call_index` and `record_call` concurrently.
pub struct SqliteRecorder {
    /// Guarded connection.
    connection: Mutex<Connection>,
}

impl SqliteRecorder {
    /// Opens (or creates) the Landscape database at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let connection = Connection::open(&config.path)?;
        connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        connection.pragma_update(None, "journal_mode", "wal")?;
        connection.pragma_update(None, "synchronous", "full")?;
        connection.pragma_update(None, "foreign_keys", "on")?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Opens an in-memory Landscape, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let connection = Connection::open_in_memory()?;
        connection.pragma_update(None, "foreign_keys", "on")?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Acquires the connection, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Acquires the connection for read-side queries.
    pub(crate) fn read_lock(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }

    /// Allocates the next identifier with the given prefix.
    fn next_id(connection: &Connection, prefix: &str) -> Result<String, RecorderError> {
        connection
            .execute(
                "INSERT INTO id_sequence (name, value) VALUES ('global', 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1",
                [],
            )
            .map_err(recorder_error)?;
        let value: i64 = connection
            .query_row("SELECT value FROM id_sequence WHERE name = 'global'", [], |row| {
                row.get(0)
            })
            .map_err(recorder_error)?;
        Ok(format!("{prefix}-{value}"))
    }

    /// Flips a finalized run back to `resumed` and clears its end timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Constraint`] when the run is unknown.
    pub fn resume_run(&self, run_id: &RunId) -> Result<(), RecorderError> {
        let connection = self.lock();
        let updated = connection
            .execute(
                "UPDATE runs SET status = ?1, completed_at = NULL WHERE run_id = ?2",
                params![run_status_label(RunStatus::Resumed), run_id.as_str()],
            )
            .map_err(recorder_error)?;
        if updated == 0 {
            return Err(RecorderError::Constraint(format!("unknown run {run_id}")));
        }
        Ok(())
    }
}

impl Recorder for SqliteRecorder {
    fn begin_run(
        &self,
        config: &Value,
        canonical_version: &str,
    ) -> Result<RunRecord, RecorderError> {
        let config_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, config)?;
        let started_at = Timestamp::now();
        let connection = self.lock();
        let run_id = Self::next_id(&connection, "run")?;
        connection
            .execute(
                "INSERT INTO runs (run_id, config_hash, canonical_version, started_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    config_hash.value,
                    canonical_version,
                    started_at.as_unix_millis(),
                    run_status_label(RunStatus::Running),
                ],
            )
            .map_err(recorder_error)?;
        Ok(RunRecord {
            run_id: RunId::new(run_id),
            config_hash,
            canonical_version: canonical_version.to_string(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
        })
    }

    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), RecorderError> {
        let connection = self.lock();
        let updated = connection
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3",
                params![
                    run_status_label(status),
                    Timestamp::now().as_unix_millis(),
                    run_id.as_str()
                ],
            )
            .map_err(recorder_error)?;
        if updated == 0 {
            return Err(RecorderError::Constraint(format!("unknown run {run_id}")));
        }
        Ok(())
    }

    fn register_node(
        &self,
        run_id: &RunId,
        plugin_name: &str,
        plugin_version: &str,
        node_type: NodeType,
        config: &Value,
        schema: &Value,
    ) -> Result<NodeRecord, RecorderError> {
        let config_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, config)?;
        let connection = self.lock();
        let node_id = Self::next_id(&connection, "node")?;
        connection
            .execute(
                "INSERT INTO nodes (node_id, run_id, plugin_name, plugin_version, node_type,
                                    config_hash, schema_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    node_id,
                    run_id.as_str(),
                    plugin_name,
                    plugin_version,
                    node_type_label(node_type),
                    config_hash.value,
                    schema.to_string(),
                ],
            )
            .map_err(recorder_error)?;
        Ok(NodeRecord {
            node_id: NodeId::new(node_id),
            run_id: run_id.clone(),
            plugin_name: plugin_name.to_string(),
            plugin_version: plugin_version.to_string(),
            node_type,
            config_hash,
            schema_json: schema.clone(),
        })
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: EdgeMode,
    ) -> Result<EdgeRecord, RecorderError> {
        let connection = self.lock();
        let edge_id = Self::next_id(&connection, "edge")?;
        connection
            .execute(
                "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, label, default_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    edge_id,
                    run_id.as_str(),
                    from_node_id.as_str(),
                    to_node_id.as_str(),
                    label,
                    edge_mode_label(mode),
                ],
            )
            .map_err(recorder_error)?;
        Ok(EdgeRecord {
            edge_id: EdgeId::new(edge_id),
            run_id: run_id.clone(),
            from_node_id: from_node_id.clone(),
            to_node_id: to_node_id.clone(),
            label: label.to_string(),
            default_mode: mode,
        })
    }

    fn record_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        data: &RowData,
    ) -> Result<RowRecord, RecorderError> {
        let row_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, data)?;
        let row_index_db = i64::try_from(row_index)
            .map_err(|_| RecorderError::Storage("row index overflow".to_string()))?;
        let connection = self.lock();
        let existing: Option<(String, String, Option<String>)> = connection
            .query_row(
                "SELECT row_id, row_hash, row_ref FROM rows
                 WHERE run_id = ?1 AND source_node_id = ?2 AND row_index = ?3",
                params![run_id.as_str(), source_node_id.as_str(), row_index_db],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(recorder_error)?;
        if let Some((row_id, stored_hash, row_ref)) = existing {
            return Ok(RowRecord {
                row_id: RowId::new(row_id),
                run_id: run_id.clone(),
                source_node_id: source_node_id.clone(),
                row_index,
                row_hash: HashDigest {
                    algorithm: HashAlgorithm::Sha256,
                    value: stored_hash,
                },
                row_ref,
            });
        }
        let row_id = Self::next_id(&connection, "row")?;
        connection
            .execute(
                "INSERT INTO rows (row_id, run_id, source_node_id, row_index, row_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row_id,
                    run_id.as_str(),
                    source_node_id.as_str(),
                    row_index_db,
                    row_hash.value,
                ],
            )
            .map_err(recorder_error)?;
        Ok(RowRecord {
            row_id: RowId::new(row_id),
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            row_hash,
            row_ref: None,
        })
    }

    fn create_token(
        &self,
        row_id: &RowId,
        parent_token_id: Option<&TokenId>,
        branch_name: Option<&BranchName>,
    ) -> Result<TokenRecord, RecorderError> {
        let connection = self.lock();
        let token_id = Self::next_id(&connection, "t")?;
        connection
            .execute(
                "INSERT INTO tokens (token_id, row_id, parent_token_id, branch_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token_id,
                    row_id.as_str(),
                    parent_token_id.map(TokenId::as_str),
                    branch_name.map(BranchName::as_str),
                ],
            )
            .map_err(recorder_error)?;
        Ok(TokenRecord {
            token_id: TokenId::new(token_id),
            row_id: row_id.clone(),
            parent_token_id: parent_token_id.cloned(),
            branch_name: branch_name.cloned(),
        })
    }

    fn begin_node_state(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        step_index: u32,
        input_data: &Value,
        attempt: u32,
    ) -> Result<NodeStateRecord, RecorderError> {
        let input_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, input_data)?;
        let started_at = Timestamp::now();
        let connection = self.lock();
        let state_id = Self::next_id(&connection, "s")?;
        connection
            .execute(
                "INSERT INTO node_states (state_id, run_id, token_id, node_id, step_index,
                                          attempt, status, started_at, input_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    state_id,
                    run_id.as_str(),
                    token_id.as_str(),
                    node_id.as_str(),
                    step_index,
                    attempt,
                    state_status_label(NodeStateStatus::Running),
                    started_at.as_unix_millis(),
                    input_hash.value,
                ],
            )
            .map_err(recorder_error)?;
        Ok(NodeStateRecord {
            state_id: StateId::new(state_id),
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            step_index,
            attempt,
            status: NodeStateStatus::Running,
            started_at,
            completed_at: None,
            input_hash,
            output_hash: None,
            error_json: None,
            duration_ms: None,
        })
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        status: NodeStateStatus,
        output_data: Option<&Value>,
        error: Option<&Value>,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        let output_hash = match output_data {
            Some(output) => Some(hash_canonical_json(DEFAULT_HASH_ALGORITHM, output)?),
            None => None,
        };
        let duration_db = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let connection = self.lock();
        let updated = connection
            .execute(
                "UPDATE node_states
                 SET status = ?1, completed_at = ?2, output_hash = ?3, error_json = ?4,
                     duration_ms = ?5
                 WHERE state_id = ?6",
                params![
                    state_status_label(status),
                    Timestamp::now().as_unix_millis(),
                    output_hash.map(|digest| digest.value),
                    error.map(std::string::ToString::to_string),
                    duration_db,
                    state_id.as_str(),
                ],
            )
            .map_err(recorder_error)?;
        if updated == 0 {
            return Err(RecorderError::Constraint(format!("unknown state {state_id}")));
        }
        Ok(())
    }

    fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: EdgeMode,
        reason: &Value,
    ) -> Result<RoutingEventRecord, RecorderError> {
        let reason_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, reason)?;
        let connection = self.lock();
        let event_id = Self::next_id(&connection, "ev")?;
        connection
            .execute(
                "INSERT INTO routing_events (event_id, state_id, edge_id, mode, reason_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event_id,
                    state_id.as_str(),
                    edge_id.as_str(),
                    edge_mode_label(mode),
                    reason_hash.value,
                ],
            )
            .map_err(recorder_error)?;
        Ok(RoutingEventRecord {
            event_id: EventId::new(event_id),
            state_id: state_id.clone(),
            edge_id: edge_id.clone(),
            mode,
            reason_hash,
        })
    }

    fn allocate_call_index(&self, state_id: &StateId) -> Result<u32, RecorderError> {
        let connection = self.lock();
        let next: Option<i64> = connection
            .query_row(
                "UPDATE node_states SET next_call_index = next_call_index + 1
                 WHERE state_id = ?1
                 RETURNING next_call_index - 1",
                params![state_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(recorder_error)?;
        let next =
            next.ok_or_else(|| RecorderError::Constraint(format!("unknown state {state_id}")))?;
        u32::try_from(next)
            .map_err(|_| RecorderError::Storage("call index overflow".to_string()))
    }

    fn record_call(&self, call: &NewCall<'_>) -> Result<CallRecord, RecorderError> {
        let request_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, call.request_data)?;
        let response_hash = match call.response_data {
            Some(response) => Some(hash_canonical_json(DEFAULT_HASH_ALGORITHM, response)?),
            None => None,
        };
        let created_at = Timestamp::now();
        let latency_db = i64::try_from(call.latency_ms).unwrap_or(i64::MAX);
        let connection = self.lock();
        let call_id = Self::next_id(&connection, "call")?;
        connection
            .execute(
                "INSERT INTO calls (call_id, state_id, call_index, call_type, status,
                                    request_hash, request_ref, response_hash, response_ref,
                                    error_json, latency_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    call_id,
                    call.state_id.as_str(),
                    call.call_index,
                    call_type_label(call.call_type),
                    call_status_label(call.status),
                    request_hash.value,
                    call.request_ref,
                    response_hash.as_ref().map(|digest| digest.value.clone()),
                    call.response_ref,
                    call.error.map(std::string::ToString::to_string),
                    latency_db,
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(recorder_error)?;
        Ok(CallRecord {
            call_id: CallId::new(call_id),
            state_id: call.state_id.clone(),
            call_index: call.call_index,
            call_type: call.call_type,
            status: call.status,
            request_hash,
            request_ref: call.request_ref.map(str::to_string),
            response_hash,
            response_ref: call.response_ref.map(str::to_string),
            error_json: call.error.cloned(),
            latency_ms: call.latency_ms,
            created_at,
        })
    }

    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: TokenOutcome,
        error: Option<&Value>,
    ) -> Result<TokenOutcomeRecord, RecorderError> {
        let recorded_at = Timestamp::now();
        let connection = self.lock();
        connection
            .execute(
                "INSERT INTO token_outcomes (token_id, outcome, error_json, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token_id.as_str(),
                    outcome_label(outcome),
                    error.map(std::string::ToString::to_string),
                    recorded_at.as_unix_millis(),
                ],
            )
            .map_err(recorder_error)?;
        Ok(TokenOutcomeRecord {
            token_id: token_id.clone(),
            outcome,
            error_json: error.cloned(),
            recorded_at,
        })
    }

    fn record_validation_error(
        &self,
        run_id: &RunId,
        row_id: &RowId,
        node_id: &NodeId,
        schema_mode: &str,
        error: &str,
        destination: &str,
    ) -> Result<ValidationErrorRecord, RecorderError> {
        let connection = self.lock();
        let error_id = Self::next_id(&connection, "verr")?;
        connection
            .execute(
                "INSERT INTO validation_errors (error_id, run_id, row_id, node_id, schema_mode,
                                                error, destination)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    error_id,
                    run_id.as_str(),
                    row_id.as_str(),
                    node_id.as_str(),
                    schema_mode,
                    error,
                    destination,
                ],
            )
            .map_err(recorder_error)?;
        Ok(ValidationErrorRecord {
            error_id,
            run_id: run_id.clone(),
            row_id: row_id.clone(),
            node_id: node_id.clone(),
            schema_mode: schema_mode.to_string(),
            error: error.to_string(),
            destination: destination.to_string(),
        })
    }

    fn record_transform_error(
        &self,
        run_id: &RunId,
        state_id: &StateId,
        token_id: &TokenId,
        transform_id: &NodeId,
        error_details: &Value,
        destination: &str,
    ) -> Result<TransformErrorRecord, RecorderError> {
        let connection = self.lock();
        let error_id = Self::next_id(&connection, "terr")?;
        connection
            .execute(
                "INSERT INTO transform_errors (error_id, run_id, state_id, token_id,
                                               transform_id, error_details_json, destination)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    error_id,
                    run_id.as_str(),
                    state_id.as_str(),
                    token_id.as_str(),
                    transform_id.as_str(),
                    error_details.to_string(),
                    destination,
                ],
            )
            .map_err(recorder_error)?;
        Ok(TransformErrorRecord {
            error_id,
            run_id: run_id.clone(),
            state_id: state_id.clone(),
            token_id: token_id.clone(),
            transform_id: transform_id.clone(),
            error_details_json: error_details.clone(),
            destination: destination.to_string(),
        })
    }

    fn record_sink_artifact(
        &self,
        state_id: &StateId,
        sink_name: &SinkName,
        descriptor: &ArtifactDescriptor,
    ) -> Result<SinkArtifactRecord, RecorderError> {
        let size_db = i64::try_from(descriptor.size_bytes).unwrap_or(i64::MAX);
        let connection = self.lock();
        let artifact_id = Self::next_id(&connection, "art")?;
        connection
            .execute(
                "INSERT INTO sink_artifacts (artifact_id, state_id, sink_name, artifact_type,
                                             path_or_uri, size_bytes, content_hash, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact_id,
                    state_id.as_str(),
                    sink_name.as_str(),
                    descriptor.artifact_type,
                    descriptor.path_or_uri,
                    size_db,
                    descriptor.content_hash.value,
                    descriptor.metadata.as_ref().map(std::string::ToString::to_string),
                ],
            )
            .map_err(recorder_error)?;
        Ok(SinkArtifactRecord {
            artifact_id,
            state_id: state_id.clone(),
            sink_name: sink_name.clone(),
            artifact_type: descriptor.artifact_type.clone(),
            path_or_uri: descriptor.path_or_uri.clone(),
            size_bytes: descriptor.size_bytes,
            content_hash: descriptor.content_hash.clone(),
            metadata_json: descriptor.metadata.clone(),
        })
    }
}

// ============================================================================
// SECTION: Setup Helpers
// ============================================================================

/// Rejects directory paths before opening the database.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(format!(
            "store path is a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Creates the parent directory for the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

/// Applies the schema and stamps the schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    let version: i64 = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        connection.execute_batch(SCHEMA_SQL)?;
        connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    } else if version != SCHEMA_VERSION {
        return Err(SqliteStoreError::Invalid(format!(
            "unsupported landscape schema version {version} (expected {SCHEMA_VERSION})"
        )));
    } else {
        connection.execute_batch(SCHEMA_SQL)?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Enum Labels
// ============================================================================

/// Stable text label for a run status.
#[must_use]
pub fn run_status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Resumed => "resumed",
    }
}

/// Parses a run status label.
#[must_use]
pub fn parse_run_status(label: &str) -> Option<RunStatus> {
    match label {
        "running" => Some(RunStatus::Running),
        "completed" => Some(RunStatus::Completed),
        "failed" => Some(RunStatus::Failed),
        "cancelled" => Some(RunStatus::Cancelled),
        "resumed" => Some(RunStatus::Resumed),
        _ => None,
    }
}

/// Stable text label for a node type.
#[must_use]
pub fn node_type_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Source => "source",
        NodeType::Transform => "transform",
        NodeType::Gate => "gate",
        NodeType::Coalesce => "coalesce",
        NodeType::Aggregation => "aggregation",
        NodeType::Sink => "sink",
    }
}

/// Parses a node type label.
#[must_use]
pub fn parse_node_type(label: &str) -> Option<NodeType> {
    match label {
        "source" => Some(NodeType::Source),
        "transform" => Some(NodeType::Transform),
        "gate" => Some(NodeType::Gate),
        "coalesce" => Some(NodeType::Coalesce),
        "aggregation" => Some(NodeType::Aggregation),
        "sink" => Some(NodeType::Sink),
        _ => None,
    }
}

/// Stable text label for an edge mode.
#[must_use]
pub fn edge_mode_label(mode: EdgeMode) -> &'static str {
    match mode {
        EdgeMode::Move => "move",
        EdgeMode::Copy => "copy",
        EdgeMode::Divert => "divert",
    }
}

/// Parses an edge mode label.
#[must_use]
pub fn parse_edge_mode(label: &str) -> Option<EdgeMode> {
    match label {
        "move" => Some(EdgeMode::Move),
        "copy" => Some(EdgeMode::Copy),
        "divert" => Some(EdgeMode::Divert),
        _ => None,
    }
}

/// Stable text label for a node-state status.
#[must_use]
pub fn state_status_label(status: NodeStateStatus) -> &'static str {
    match status {
        NodeStateStatus::Running => "running",
        NodeStateStatus::Completed => "completed",
        NodeStateStatus::Failed => "failed",
    }
}

/// Parses a node-state status label.
#[must_use]
pub fn parse_state_status(label: &str) -> Option<NodeStateStatus> {
    match label {
        "running" => Some(NodeStateStatus::Running),
        "completed" => Some(NodeStateStatus::Completed),
        "failed" => Some(NodeStateStatus::Failed),
        _ => None,
    }
}

/// Stable text label for a call type.
#[must_use]
pub fn call_type_label(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Llm => "llm",
        CallType::Http => "http",
        CallType::Sql => "sql",
        CallType::Filesystem => "filesystem",
    }
}

/// Parses a call type label.
#[must_use]
pub fn parse_call_type(label: &str) -> Option<CallType> {
    match label {
        "llm" => Some(CallType::Llm),
        "http" => Some(CallType::Http),
        "sql" => Some(CallType::Sql),
        "filesystem" => Some(CallType::Filesystem),
        _ => None,
    }
}

/// Stable text label for a call status.
#[must_use]
pub fn call_status_label(status: CallStatus) -> &'static str {
    match status {
        CallStatus::Success => "success",
        CallStatus::Error => "error",
    }
}

/// Parses a call status label.
#[must_use]
pub fn parse_call_status(label: &str) -> Option<CallStatus> {
    match label {
        "success" => Some(CallStatus::Success),
        "error" => Some(CallStatus::Error),
        _ => None,
    }
}

/// Stable text label for a terminal outcome.
#[must_use]
pub fn outcome_label(outcome: TokenOutcome) -> &'static str {
    match outcome {
        TokenOutcome::Completed => "completed",
        TokenOutcome::Routed => "routed",
        TokenOutcome::Forked => "forked",
        TokenOutcome::ConsumedInBatch => "consumed_in_batch",
        TokenOutcome::Coalesced => "coalesced",
        TokenOutcome::Quarantined => "quarantined",
        TokenOutcome::Failed => "failed",
    }
}

/// Parses a terminal outcome label.
#[must_use]
pub fn parse_outcome(label: &str) -> Option<TokenOutcome> {
    match label {
        "completed" => Some(TokenOutcome::Completed),
        "routed" => Some(TokenOutcome::Routed),
        "forked" => Some(TokenOutcome::Forked),
        "consumed_in_batch" => Some(TokenOutcome::ConsumedInBatch),
        "coalesced" => Some(TokenOutcome::Coalesced),
        "quarantined" => Some(TokenOutcome::Quarantined),
        "failed" => Some(TokenOutcome::Failed),
        _ => None,
    }
}
