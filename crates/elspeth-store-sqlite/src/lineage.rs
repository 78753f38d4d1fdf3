// crates/elspeth-store-sqlite/src/lineage.rs
// ============================================================================
// Module: Landscape Lineage Reader
// Description: Read side of the audit store: history, resume, verification.
// Purpose: Reconstruct token histories, resume cursors, and integrity reports
//          from the persisted record alone.
// Dependencies: elspeth-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Everything here answers questions from the stored record alone: a token's
//! full history for `explain`, the resume cursor for interrupted runs, and an
//! integrity report re-checking the store against the engine's quantified
//! invariants.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use elspeth_core::core::hashing::HashAlgorithm;
use elspeth_core::core::hashing::HashDigest;
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
use elspeth_core::core::lineage::ResumeState;
use elspeth_core::core::lineage::RowProgress;
use elspeth_core::core::lineage::TokenLineage;
use elspeth_core::core::records::EdgeRecord;
use elspeth_core::core::records::NodeRecord;
use elspeth_core::core::records::RowRecord;
use elspeth_core::core::records::RunRecord;
use elspeth_core::core::records::TokenRecord;
use elspeth_core::core::states::CallRecord;
use elspeth_core::core::states::NodeStateRecord;
use elspeth_core::core::states::RoutingEventRecord;
use elspeth_core::core::states::SinkArtifactRecord;
use elspeth_core::core::states::TokenOutcomeRecord;
use elspeth_core::core::states::TransformErrorRecord;
use elspeth_core::core::states::ValidationErrorRecord;
use elspeth_core::core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Serialize;

use crate::store::SqliteRecorder;
use crate::store::SqliteStoreError;
use crate::store::parse_call_status;
use crate::store::parse_call_type;
use crate::store::parse_edge_mode;
use crate::store::parse_node_type;
use crate::store::parse_outcome;
use crate::store::parse_run_status;
use crate::store::parse_state_status;

// ============================================================================
// SECTION: Verification Report
// ============================================================================

/// One integrity check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationCheck {
    /// Check name.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Violation detail when the check failed.
    pub detail: Option<String>,
}

/// Integrity report for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Run identifier.
    pub run_id: RunId,
    /// Individual check results.
    pub checks: Vec<VerificationCheck>,
    /// True when every check passed.
    pub passed: bool,
}

// ============================================================================
// SECTION: Lineage Queries
// ============================================================================

impl SqliteRecorder {
    /// Loads a run record.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn run_record(&self, run_id: &RunId) -> Result<Option<RunRecord>, SqliteStoreError> {
        let connection = self.read_lock();
        connection
            .query_row(
                "SELECT run_id, config_hash, canonical_version, started_at, completed_at, status
                 FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                map_run_record,
            )
            .optional()
            .map_err(SqliteStoreError::from)
    }

    /// Loads every node registered for a run.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn run_nodes(&self, run_id: &RunId) -> Result<Vec<NodeRecord>, SqliteStoreError> {
        let connection = self.read_lock();
        let mut statement = connection.prepare(
            "SELECT node_id, run_id, plugin_name, plugin_version, node_type, config_hash,
                    schema_json
             FROM nodes WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let nodes = statement
            .query_map(params![run_id.as_str()], map_node_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Loads every row persisted for a run, in row-index order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn run_rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, SqliteStoreError> {
        let connection = self.read_lock();
        let mut statement = connection.prepare(
            "SELECT row_id, run_id, source_node_id, row_index, row_hash, row_ref
             FROM rows WHERE run_id = ?1 ORDER BY row_index",
        )?;
        let rows = statement
            .query_map(params![run_id.as_str()], map_row_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Loads every edge registered for a run.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn run_edges(&self, run_id: &RunId) -> Result<Vec<EdgeRecord>, SqliteStoreError> {
        let connection = self.read_lock();
        let mut statement = connection.prepare(
            "SELECT edge_id, run_id, from_node_id, to_node_id, label, default_mode
             FROM edges WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let edges = statement
            .query_map(params![run_id.as_str()], map_edge_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    /// Reconstructs the full lineage of one token.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when the token is unknown or the
    /// stored record is internally inconsistent.
    pub fn token_lineage(&self, token_id: &TokenId) -> Result<TokenLineage, SqliteStoreError> {
        let connection = self.read_lock();
        lineage_for_token(&connection, token_id)
    }

    /// Reconstructs the lineage of a row via its most recent root token.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when the row has no root token.
    pub fn row_lineage(&self, row_id: &RowId) -> Result<TokenLineage, SqliteStoreError> {
        let connection = self.read_lock();
        let token_id: Option<String> = connection
            .query_row(
                "SELECT token_id FROM tokens
                 WHERE row_id = ?1 AND parent_token_id IS NULL
                 ORDER BY rowid DESC LIMIT 1",
                params![row_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let token_id = token_id.ok_or_else(|| {
            SqliteStoreError::Invalid(format!("row {row_id} has no root token"))
        })?;
        lineage_for_token(&connection, &TokenId::new(token_id))
    }

    /// Reconstructs the resume cursor for an interrupted run.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when queries fail.
    pub fn resume_state(&self, run_id: &RunId) -> Result<ResumeState, SqliteStoreError> {
        let connection = self.read_lock();
        let mut statement = connection.prepare(
            "SELECT row_id, row_index FROM rows WHERE run_id = ?1 ORDER BY row_index",
        )?;
        let rows: Vec<(String, i64)> = statement
            .query_map(params![run_id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut unfinished: BTreeMap<u64, RowProgress> = BTreeMap::new();
        let mut finished: BTreeSet<u64> = BTreeSet::new();
        for (row_id, row_index) in rows {
            let row_index = u64::try_from(row_index)
                .map_err(|_| SqliteStoreError::Invalid("negative row index".to_string()))?;
            let open_tokens: i64 = connection.query_row(
                "SELECT COUNT(*) FROM tokens t
                 WHERE t.row_id = ?1
                   AND NOT EXISTS (SELECT 1 FROM token_outcomes o WHERE o.token_id = t.token_id)",
                params![row_id],
                |row| row.get(0),
            )?;
            if open_tokens == 0 {
                finished.insert(row_index);
            } else {
                let last_completed_step: i64 = connection.query_row(
                    "SELECT COALESCE(MAX(ns.step_index), 0) FROM node_states ns
                     JOIN tokens t ON ns.token_id = t.token_id
                     WHERE t.row_id = ?1 AND ns.status = 'completed'",
                    params![row_id],
                    |row| row.get(0),
                )?;
                unfinished.insert(
                    row_index,
                    RowProgress {
                        row_id: RowId::new(row_id),
                        last_completed_step: u32::try_from(last_completed_step).unwrap_or(0),
                    },
                );
            }
        }

        let cursor = unfinished.keys().next().copied().map_or_else(
            || finished.iter().next_back().map_or(0, |last| last + 1),
            |first| first,
        );
        let completed = finished.into_iter().filter(|index| *index >= cursor).collect();
        Ok(ResumeState {
            cursor,
            completed,
            partial: unfinished,
        })
    }

    /// Re-checks the stored record against the engine's quantified
    /// invariants and reports violations.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when queries fail.
    pub fn verify_run(&self, run_id: &RunId) -> Result<VerificationReport, SqliteStoreError> {
        let connection = self.read_lock();
        let mut checks = Vec::new();

        let bad_roots: i64 = connection.query_row(
            "SELECT COUNT(*) FROM tokens t
             JOIN rows r ON t.row_id = r.row_id
             WHERE r.run_id = ?1 AND t.parent_token_id IS NULL
               AND (SELECT COUNT(*) FROM node_states ns
                    WHERE ns.token_id = t.token_id AND ns.step_index = 0) != 1",
            params![run_id.as_str()],
            |row| row.get(0),
        )?;
        checks.push(check("root_tokens_have_one_source_state", bad_roots == 0, bad_roots));

        let open_tokens: i64 = connection.query_row(
            "SELECT COUNT(*) FROM tokens t
             JOIN rows r ON t.row_id = r.row_id
             WHERE r.run_id = ?1
               AND NOT EXISTS (SELECT 1 FROM token_outcomes o WHERE o.token_id = t.token_id)",
            params![run_id.as_str()],
            |row| row.get(0),
        )?;
        checks.push(check("every_token_has_terminal_outcome", open_tokens == 0, open_tokens));

        let orphan_calls: i64 = connection.query_row(
            "SELECT COUNT(*) FROM calls c
             WHERE NOT EXISTS (SELECT 1 FROM node_states ns WHERE ns.state_id = c.state_id)",
            [],
            |row| row.get(0),
        )?;
        checks.push(check("calls_reference_states", orphan_calls == 0, orphan_calls));

        let open_states: i64 = connection.query_row(
            "SELECT COUNT(*) FROM node_states WHERE run_id = ?1 AND status = 'running'",
            params![run_id.as_str()],
            |row| row.get(0),
        )?;
        checks.push(check("no_states_left_running", open_states == 0, open_states));

        let bad_hashes: i64 = connection.query_row(
            "SELECT COUNT(*) FROM sink_artifacts sa
             JOIN node_states ns ON sa.state_id = ns.state_id
             WHERE ns.run_id = ?1 AND length(sa.content_hash) != 64",
            params![run_id.as_str()],
            |row| row.get(0),
        )?;
        checks.push(check("artifact_hashes_are_sha256", bad_hashes == 0, bad_hashes));

        let passed = checks.iter().all(|entry| entry.passed);
        Ok(VerificationReport {
            run_id: run_id.clone(),
            checks,
            passed,
        })
    }
}

/// Builds one verification check entry.
fn check(name: &str, passed: bool, violations: i64) -> VerificationCheck {
    VerificationCheck {
        name: name.to_string(),
        passed,
        detail: if passed { None } else { Some(format!("{violations} violation(s)")) },
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Builds a [`TokenLineage`] for one token on an open connection.
fn lineage_for_token(
    connection: &Connection,
    token_id: &TokenId,
) -> Result<TokenLineage, SqliteStoreError> {
    let token = load_token(connection, token_id)?
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown token {token_id}")))?;

    let row = connection
        .query_row(
            "SELECT row_id, run_id, source_node_id, row_index, row_hash, row_ref
             FROM rows WHERE row_id = ?1",
            params![token.row_id.as_str()],
            map_row_record,
        )
        .optional()?
        .ok_or_else(|| {
            SqliteStoreError::Invalid(format!("token {token_id} references a missing row"))
        })?;

    let mut parents = Vec::new();
    let mut cursor = token.parent_token_id.clone();
    while let Some(parent_id) = cursor {
        let parent = load_token(connection, &parent_id)?.ok_or_else(|| {
            SqliteStoreError::Invalid(format!("missing parent token {parent_id}"))
        })?;
        cursor = parent.parent_token_id.clone();
        parents.push(parent);
    }
    parents.reverse();

    let mut statement = connection.prepare(
        "SELECT state_id, run_id, token_id, node_id, step_index, attempt, status, started_at,
                completed_at, input_hash, output_hash, error_json, duration_ms
         FROM node_states WHERE token_id = ?1 ORDER BY step_index, attempt",
    )?;
    let node_states: Vec<NodeStateRecord> = statement
        .query_map(params![token_id.as_str()], map_state_record)?
        .collect::<Result<Vec<_>, _>>()?;

    let state_ids: Vec<String> =
        node_states.iter().map(|state| state.state_id.as_str().to_string()).collect();

    let mut routing_events = Vec::new();
    let mut calls = Vec::new();
    let mut artifacts = Vec::new();
    for state_id in &state_ids {
        let mut events = connection.prepare(
            "SELECT event_id, state_id, edge_id, mode, reason_hash
             FROM routing_events WHERE state_id = ?1 ORDER BY rowid",
        )?;
        routing_events.extend(
            events
                .query_map(params![state_id], map_event_record)?
                .collect::<Result<Vec<_>, _>>()?,
        );
        let mut call_stmt = connection.prepare(
            "SELECT call_id, state_id, call_index, call_type, status, request_hash, request_ref,
                    response_hash, response_ref, error_json, latency_ms, created_at
             FROM calls WHERE state_id = ?1 ORDER BY call_index",
        )?;
        calls.extend(
            call_stmt
                .query_map(params![state_id], map_call_record)?
                .collect::<Result<Vec<_>, _>>()?,
        );
        let mut artifact_stmt = connection.prepare(
            "SELECT artifact_id, state_id, sink_name, artifact_type, path_or_uri, size_bytes,
                    content_hash, metadata_json
             FROM sink_artifacts WHERE state_id = ?1 ORDER BY rowid",
        )?;
        artifacts.extend(
            artifact_stmt
                .query_map(params![state_id], map_artifact_record)?
                .collect::<Result<Vec<_>, _>>()?,
        );
    }

    let outcome = connection
        .query_row(
            "SELECT token_id, outcome, error_json, recorded_at
             FROM token_outcomes WHERE token_id = ?1",
            params![token_id.as_str()],
            map_outcome_record,
        )
        .optional()?;

    let mut validation_stmt = connection.prepare(
        "SELECT error_id, run_id, row_id, node_id, schema_mode, error, destination
         FROM validation_errors WHERE row_id = ?1 ORDER BY rowid",
    )?;
    let validation_errors: Vec<ValidationErrorRecord> = validation_stmt
        .query_map(params![token.row_id.as_str()], map_validation_record)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut transform_stmt = connection.prepare(
        "SELECT error_id, run_id, state_id, token_id, transform_id, error_details_json,
                destination
         FROM transform_errors WHERE token_id = ?1 ORDER BY rowid",
    )?;
    let transform_errors: Vec<TransformErrorRecord> = transform_stmt
        .query_map(params![token_id.as_str()], map_transform_record)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TokenLineage {
        token,
        row,
        parents,
        node_states,
        routing_events,
        calls,
        artifacts,
        outcome,
        validation_errors,
        transform_errors,
    })
}

/// Loads one token record.
fn load_token(
    connection: &Connection,
    token_id: &TokenId,
) -> Result<Option<TokenRecord>, SqliteStoreError> {
    connection
        .query_row(
            "SELECT token_id, row_id, parent_token_id, branch_name FROM tokens
             WHERE token_id = ?1",
            params![token_id.as_str()],
            |row| {
                let parent: Option<String> = row.get(2)?;
                let branch: Option<String> = row.get(3)?;
                Ok(TokenRecord {
                    token_id: TokenId::new(row.get::<_, String>(0)?),
                    row_id: RowId::new(row.get::<_, String>(1)?),
                    parent_token_id: parent.map(TokenId::new),
                    branch_name: branch.map(BranchName::new),
                })
            },
        )
        .optional()
        .map_err(SqliteStoreError::from)
}

/// Maps a run row.
fn map_run_record(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(5)?;
    Ok(RunRecord {
        run_id: RunId::new(row.get::<_, String>(0)?),
        config_hash: digest(row.get(1)?),
        canonical_version: row.get(2)?,
        started_at: Timestamp::from_unix_millis(row.get(3)?),
        completed_at: row.get::<_, Option<i64>>(4)?.map(Timestamp::from_unix_millis),
        status: parse_run_status(&status).unwrap_or(elspeth_core::core::records::RunStatus::Failed),
    })
}

/// Maps a node row.
fn map_node_record(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    let node_type: String = row.get(4)?;
    let schema_json: String = row.get(6)?;
    Ok(NodeRecord {
        node_id: NodeId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        plugin_name: row.get(2)?,
        plugin_version: row.get(3)?,
        node_type: parse_node_type(&node_type)
            .unwrap_or(elspeth_core::core::records::NodeType::Transform),
        config_hash: digest(row.get(5)?),
        schema_json: serde_json::from_str(&schema_json).unwrap_or(serde_json::Value::Null),
    })
}

/// Maps an edge row.
fn map_edge_record(row: &Row<'_>) -> rusqlite::Result<EdgeRecord> {
    let mode: String = row.get(5)?;
    Ok(EdgeRecord {
        edge_id: EdgeId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        from_node_id: NodeId::new(row.get::<_, String>(2)?),
        to_node_id: NodeId::new(row.get::<_, String>(3)?),
        label: row.get(4)?,
        default_mode: parse_edge_mode(&mode)
            .unwrap_or(elspeth_core::core::records::EdgeMode::Move),
    })
}

/// Maps a row record.
fn map_row_record(row: &Row<'_>) -> rusqlite::Result<RowRecord> {
    Ok(RowRecord {
        row_id: RowId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        source_node_id: NodeId::new(row.get::<_, String>(2)?),
        row_index: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
        row_hash: digest(row.get(4)?),
        row_ref: row.get(5)?,
    })
}

/// Maps a node-state row.
fn map_state_record(row: &Row<'_>) -> rusqlite::Result<NodeStateRecord> {
    let status: String = row.get(6)?;
    let error_json: Option<String> = row.get(11)?;
    Ok(NodeStateRecord {
        state_id: StateId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        token_id: TokenId::new(row.get::<_, String>(2)?),
        node_id: NodeId::new(row.get::<_, String>(3)?),
        step_index: u32::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        attempt: u32::try_from(row.get::<_, i64>(5)?).unwrap_or(1),
        status: parse_state_status(&status)
            .unwrap_or(elspeth_core::core::states::NodeStateStatus::Failed),
        started_at: Timestamp::from_unix_millis(row.get(7)?),
        completed_at: row.get::<_, Option<i64>>(8)?.map(Timestamp::from_unix_millis),
        input_hash: digest(row.get(9)?),
        output_hash: row.get::<_, Option<String>>(10)?.map(digest),
        error_json: error_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        duration_ms: row.get::<_, Option<i64>>(12)?.map(|value| u64::try_from(value).unwrap_or(0)),
    })
}

/// Maps a routing-event row.
fn map_event_record(row: &Row<'_>) -> rusqlite::Result<RoutingEventRecord> {
    let mode: String = row.get(3)?;
    Ok(RoutingEventRecord {
        event_id: EventId::new(row.get::<_, String>(0)?),
        state_id: StateId::new(row.get::<_, String>(1)?),
        edge_id: EdgeId::new(row.get::<_, String>(2)?),
        mode: parse_edge_mode(&mode).unwrap_or(elspeth_core::core::records::EdgeMode::Move),
        reason_hash: digest(row.get(4)?),
    })
}

/// Maps a call row.
fn map_call_record(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let call_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let error_json: Option<String> = row.get(9)?;
    Ok(CallRecord {
        call_id: CallId::new(row.get::<_, String>(0)?),
        state_id: StateId::new(row.get::<_, String>(1)?),
        call_index: u32::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
        call_type: parse_call_type(&call_type)
            .unwrap_or(elspeth_core::core::states::CallType::Http),
        status: parse_call_status(&status)
            .unwrap_or(elspeth_core::core::states::CallStatus::Error),
        request_hash: digest(row.get(5)?),
        request_ref: row.get(6)?,
        response_hash: row.get::<_, Option<String>>(7)?.map(digest),
        response_ref: row.get(8)?,
        error_json: error_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        latency_ms: u64::try_from(row.get::<_, i64>(10)?).unwrap_or(0),
        created_at: Timestamp::from_unix_millis(row.get(11)?),
    })
}

/// Maps a token-outcome row.
fn map_outcome_record(row: &Row<'_>) -> rusqlite::Result<TokenOutcomeRecord> {
    let outcome: String = row.get(1)?;
    let error_json: Option<String> = row.get(2)?;
    Ok(TokenOutcomeRecord {
        token_id: TokenId::new(row.get::<_, String>(0)?),
        outcome: parse_outcome(&outcome)
            .unwrap_or(elspeth_core::core::states::TokenOutcome::Failed),
        error_json: error_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        recorded_at: Timestamp::from_unix_millis(row.get(3)?),
    })
}

/// Maps a validation-error row.
fn map_validation_record(row: &Row<'_>) -> rusqlite::Result<ValidationErrorRecord> {
    Ok(ValidationErrorRecord {
        error_id: row.get(0)?,
        run_id: RunId::new(row.get::<_, String>(1)?),
        row_id: RowId::new(row.get::<_, String>(2)?),
        node_id: NodeId::new(row.get::<_, String>(3)?),
        schema_mode: row.get(4)?,
        error: row.get(5)?,
        destination: row.get(6)?,
    })
}

/// Maps a transform-error row.
fn map_transform_record(row: &Row<'_>) -> rusqlite::Result<TransformErrorRecord> {
    let details: String = row.get(5)?;
    Ok(TransformErrorRecord {
        error_id: row.get(0)?,
        run_id: RunId::new(row.get::<_, String>(1)?),
        state_id: StateId::new(row.get::<_, String>(2)?),
        token_id: TokenId::new(row.get::<_, String>(3)?),
        transform_id: NodeId::new(row.get::<_, String>(4)?),
        error_details_json: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        destination: row.get(6)?,
    })
}

/// Maps an artifact row.
fn map_artifact_record(row: &Row<'_>) -> rusqlite::Result<SinkArtifactRecord> {
    let metadata: Option<String> = row.get(7)?;
    Ok(SinkArtifactRecord {
        artifact_id: row.get(0)?,
        state_id: StateId::new(row.get::<_, String>(1)?),
        sink_name: SinkName::new(row.get::<_, String>(2)?),
        artifact_type: row.get(3)?,
        path_or_uri: row.get(4)?,
        size_bytes: u64::try_from(row.get::<_, i64>(5)?).unwrap_or(0),
        content_hash: digest(row.get(6)?),
        metadata_json: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

/// Wraps a stored hex digest.
fn digest(value: String) -> HashDigest {
    HashDigest {
        algorithm: HashAlgorithm::Sha256,
        value,
    }
}
