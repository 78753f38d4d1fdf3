// crates/elspeth-core/src/runtime/memory.rs
// ============================================================================
// Module: ELSPETH In-Memory Recorder
// Description: Landscape recorder backed by in-process maps.
// Purpose: Provide a deterministic recorder for tests, demos, and dry runs.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This recorder enforces the same uniqueness and foreign-key rules as the
//! durable store, which makes it a faithful stand-in for tests and for the
//! `dag` command's dry construction. It is not a durability boundary and is
//! never used in production runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde_json::Value;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::CallId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::records::EdgeMode;
use crate::core::records::EdgeRecord;
use crate::core::records::NodeRecord;
use crate::core::records::NodeType;
use crate::core::records::RowRecord;
use crate::core::records::RunRecord;
use crate::core::records::RunStatus;
use crate::core::records::TokenRecord;
use crate::core::results::RowData;
use crate::core::states::ArtifactDescriptor;
use crate::core::states::CallRecord;
use crate::core::states::NodeStateRecord;
use crate::core::states::NodeStateStatus;
use crate::core::states::RoutingEventRecord;
use crate::core::states::SinkArtifactRecord;
use crate::core::states::TokenOutcome;
use crate::core::states::TokenOutcomeRecord;
use crate::core::states::TransformErrorRecord;
use crate::core::states::ValidationErrorRecord;
use crate::core::time::Timestamp;
use crate::interfaces::recorder::NewCall;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::recorder::RecorderError;

// ============================================================================
// SECTION: Store State
// ============================================================================

/// Mutable store tables guarded by one mutex.
#[derive(Debug, Default)]
struct Tables {
    /// Monotonic id counter shared by every record kind.
    next_id: u64,
    /// Run records by id.
    runs: BTreeMap<RunId, RunRecord>,
    /// Node records by id.
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Edge records in registration order.
    edges: Vec<EdgeRecord>,
    /// Edge label uniqueness index.
    edge_labels: BTreeSet<(NodeId, String)>,
    /// Row records by id.
    rows: BTreeMap<RowId, RowRecord>,
    /// Row idempotency index.
    row_index: BTreeMap<(RunId, NodeId, u64), RowId>,
    /// Token records by id.
    tokens: BTreeMap<TokenId, TokenRecord>,
    /// Node states by id.
    states: BTreeMap<StateId, NodeStateRecord>,
    /// Node-state uniqueness index.
    state_unique: BTreeSet<(TokenId, NodeId, u32)>,
    /// Routing events in record order.
    routing_events: Vec<RoutingEventRecord>,
    /// Next call index per state.
    call_indices: BTreeMap<StateId, u32>,
    /// Call records in record order.
    calls: Vec<CallRecord>,
    /// Call uniqueness index.
    call_unique: BTreeSet<(StateId, u32)>,
    /// Terminal outcomes by token.
    outcomes: BTreeMap<TokenId, TokenOutcomeRecord>,
    /// Validation error records.
    validation_errors: Vec<ValidationErrorRecord>,
    /// Transform error records.
    transform_errors: Vec<TransformErrorRecord>,
    /// Sink artifact records.
    artifacts: Vec<SinkArtifactRecord>,
}

impl Tables {
    /// Allocates the next identifier with the given prefix.
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

// ============================================================================
// SECTION: In-Memory Recorder
// ============================================================================

/// In-memory Landscape recorder for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    /// Guarded store tables.
    tables: Mutex<Tables>,
}

impl InMemoryRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the table lock, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns a snapshot of every run record.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.values().cloned().collect()
    }

    /// Returns a snapshot of every node record.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Returns a snapshot of every edge record in registration order.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeRecord> {
        self.lock().edges.clone()
    }

    /// Returns a snapshot of every row record.
    #[must_use]
    pub fn rows(&self) -> Vec<RowRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Returns a snapshot of every token record.
    #[must_use]
    pub fn tokens(&self) -> Vec<TokenRecord> {
        self.lock().tokens.values().cloned().collect()
    }

    /// Returns a snapshot of every node state, ordered by state id.
    #[must_use]
    pub fn node_states(&self) -> Vec<NodeStateRecord> {
        self.lock().states.values().cloned().collect()
    }

    /// Returns a snapshot of every routing event in record order.
    #[must_use]
    pub fn routing_events(&self) -> Vec<RoutingEventRecord> {
        self.lock().routing_events.clone()
    }

    /// Returns a snapshot of every call record in record order.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Returns a snapshot of every terminal outcome.
    #[must_use]
    pub fn outcomes(&self) -> Vec<TokenOutcomeRecord> {
        self.lock().outcomes.values().cloned().collect()
    }

    /// Returns a snapshot of every validation error record.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<ValidationErrorRecord> {
        self.lock().validation_errors.clone()
    }

    /// Returns a snapshot of every transform error record.
    #[must_use]
    pub fn transform_errors(&self) -> Vec<TransformErrorRecord> {
        self.lock().transform_errors.clone()
    }

    /// Returns a snapshot of every sink artifact record.
    #[must_use]
    pub fn artifacts(&self) -> Vec<SinkArtifactRecord> {
        self.lock().artifacts.clone()
    }
}

impl Recorder for InMemoryRecorder {
    fn begin_run(
        &self,
        config: &Value,
        canonical_version: &str,
    ) -> Result<RunRecord, RecorderError> {
        let config_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, config)?;
        let mut tables = self.lock();
        let run_id = RunId::new(tables.next("run"));
        let record = RunRecord {
            run_id: run_id.clone(),
            config_hash,
            canonical_version: canonical_version.to_string(),
            started_at: Timestamp::now(),
            completed_at: None,
            status: RunStatus::Running,
        };
        tables.runs.insert(run_id, record.clone());
        Ok(record)
    }

    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), RecorderError> {
        let mut tables = self.lock();
        let run = tables
            .runs
            .get_mut(run_id)
            .ok_or_else(|| RecorderError::Constraint(format!("unknown run {run_id}")))?;
        run.status = status;
        run.completed_at = Some(Timestamp::now());
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
        let mut tables = self.lock();
        if !tables.runs.contains_key(run_id) {
            return Err(RecorderError::Constraint(format!("unknown run {run_id}")));
        }
        let node_id = NodeId::new(tables.next("node"));
        let record = NodeRecord {
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            plugin_name: plugin_name.to_string(),
            plugin_version: plugin_version.to_string(),
            node_type,
            config_hash,
            schema_json: schema.clone(),
        };
        tables.nodes.insert(node_id, record.clone());
        Ok(record)
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: EdgeMode,
    ) -> Result<EdgeRecord, RecorderError> {
        let mut tables = self.lock();
        if !tables.nodes.contains_key(from_node_id) || !tables.nodes.contains_key(to_node_id) {
            return Err(RecorderError::Constraint(format!(
                "edge references unknown node: {from_node_id} -> {to_node_id}"
            )));
        }
        let key = (from_node_id.clone(), label.to_string());
        if !tables.edge_labels.insert(key) {
            return Err(RecorderError::Duplicate(format!(
                "edge label '{label}' already exists on node {from_node_id}"
            )));
        }
        let edge_id = EdgeId::new(tables.next("edge"));
        let record = EdgeRecord {
            edge_id,
            run_id: run_id.clone(),
            from_node_id: from_node_id.clone(),
            to_node_id: to_node_id.clone(),
            label: label.to_string(),
            default_mode: mode,
        };
        tables.edges.push(record.clone());
        Ok(record)
    }

    fn record_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        data: &RowData,
    ) -> Result<RowRecord, RecorderError> {
        let row_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, data)?;
        let mut tables = self.lock();
        let key = (run_id.clone(), source_node_id.clone(), row_index);
        if let Some(existing) = tables.row_index.get(&key) {
            let existing = existing.clone();
            return tables
                .rows
                .get(&existing)
                .cloned()
                .ok_or_else(|| RecorderError::Constraint(format!("row index maps to missing row {existing}")));
        }
        let row_id = RowId::new(tables.next("row"));
        let record = RowRecord {
            row_id: row_id.clone(),
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            row_hash,
            row_ref: None,
        };
        tables.row_index.insert(key, row_id.clone());
        tables.rows.insert(row_id, record.clone());
        Ok(record)
    }

    fn create_token(
        &self,
        row_id: &RowId,
        parent_token_id: Option<&TokenId>,
        branch_name: Option<&BranchName>,
    ) -> Result<TokenRecord, RecorderError> {
        let mut tables = self.lock();
        if !tables.rows.contains_key(row_id) {
            return Err(RecorderError::Constraint(format!("unknown row {row_id}")));
        }
        if let Some(parent) = parent_token_id
            && !tables.tokens.contains_key(parent)
        {
            return Err(RecorderError::Constraint(format!("unknown parent token {parent}")));
        }
        let token_id = TokenId::new(tables.next("t"));
        let record = TokenRecord {
            token_id: token_id.clone(),
            row_id: row_id.clone(),
            parent_token_id: parent_token_id.cloned(),
            branch_name: branch_name.cloned(),
        };
        tables.tokens.insert(token_id, record.clone());
        Ok(record)
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
        let mut tables = self.lock();
        if !tables.tokens.contains_key(token_id) {
            return Err(RecorderError::Constraint(format!("unknown token {token_id}")));
        }
        if !tables.nodes.contains_key(node_id) {
            return Err(RecorderError::Constraint(format!("unknown node {node_id}")));
        }
        let unique_key = (token_id.clone(), node_id.clone(), attempt);
        if !tables.state_unique.insert(unique_key) {
            return Err(RecorderError::Duplicate(format!(
                "node state already exists: token {token_id}, node {node_id}, attempt {attempt}"
            )));
        }
        let state_id = StateId::new(tables.next("s"));
        let record = NodeStateRecord {
            state_id: state_id.clone(),
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            step_index,
            attempt,
            status: NodeStateStatus::Running,
            started_at: Timestamp::now(),
            completed_at: None,
            input_hash,
            output_hash: None,
            error_json: None,
            duration_ms: None,
        };
        tables.call_indices.insert(state_id.clone(), 0);
        tables.states.insert(state_id, record.clone());
        Ok(record)
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
        let mut tables = self.lock();
        let state = tables
            .states
            .get_mut(state_id)
            .ok_or_else(|| RecorderError::Constraint(format!("unknown state {state_id}")))?;
        state.status = status;
        state.completed_at = Some(Timestamp::now());
        state.output_hash = output_hash;
        state.error_json = error.cloned();
        state.duration_ms = Some(duration_ms);
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
        let mut tables = self.lock();
        if !tables.states.contains_key(state_id) {
            return Err(RecorderError::Constraint(format!("unknown state {state_id}")));
        }
        if !tables.edges.iter().any(|edge| &edge.edge_id == edge_id) {
            return Err(RecorderError::Constraint(format!("unknown edge {edge_id}")));
        }
        let event_id = EventId::new(tables.next("ev"));
        let record = RoutingEventRecord {
            event_id,
            state_id: state_id.clone(),
            edge_id: edge_id.clone(),
            mode,
            reason_hash,
        };
        tables.routing_events.push(record.clone());
        Ok(record)
    }

    fn allocate_call_index(&self, state_id: &StateId) -> Result<u32, RecorderError> {
        let mut tables = self.lock();
        let counter = tables
            .call_indices
            .get_mut(state_id)
            .ok_or_else(|| RecorderError::Constraint(format!("unknown state {state_id}")))?;
        let index = *counter;
        *counter += 1;
        Ok(index)
    }

    fn record_call(&self, call: &NewCall<'_>) -> Result<CallRecord, RecorderError> {
        let request_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, call.request_data)?;
        let response_hash = match call.response_data {
            Some(response) => Some(hash_canonical_json(DEFAULT_HASH_ALGORITHM, response)?),
            None => None,
        };
        let mut tables = self.lock();
        if !tables.states.contains_key(call.state_id) {
            return Err(RecorderError::Constraint(format!("unknown state {}", call.state_id)));
        }
        let unique_key = (call.state_id.clone(), call.call_index);
        if !tables.call_unique.insert(unique_key) {
            return Err(RecorderError::Duplicate(format!(
                "call already recorded: state {}, index {}",
                call.state_id, call.call_index
            )));
        }
        let call_id = CallId::new(tables.next("call"));
        let record = CallRecord {
            call_id,
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
            created_at: Timestamp::now(),
        };
        tables.calls.push(record.clone());
        Ok(record)
    }

    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: TokenOutcome,
        error: Option<&Value>,
    ) -> Result<TokenOutcomeRecord, RecorderError> {
        let mut tables = self.lock();
        if !tables.tokens.contains_key(token_id) {
            return Err(RecorderError::Constraint(format!("unknown token {token_id}")));
        }
        if tables.outcomes.contains_key(token_id) {
            return Err(RecorderError::Duplicate(format!(
                "token {token_id} already has a terminal outcome"
            )));
        }
        let record = TokenOutcomeRecord {
            token_id: token_id.clone(),
            outcome,
            error_json: error.cloned(),
            recorded_at: Timestamp::now(),
        };
        tables.outcomes.insert(token_id.clone(), record.clone());
        Ok(record)
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
        let mut tables = self.lock();
        let record = ValidationErrorRecord {
            error_id: tables.next("verr"),
            run_id: run_id.clone(),
            row_id: row_id.clone(),
            node_id: node_id.clone(),
            schema_mode: schema_mode.to_string(),
            error: error.to_string(),
            destination: destination.to_string(),
        };
        tables.validation_errors.push(record.clone());
        Ok(record)
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
        let mut tables = self.lock();
        let record = TransformErrorRecord {
            error_id: tables.next("terr"),
            run_id: run_id.clone(),
            state_id: state_id.clone(),
            token_id: token_id.clone(),
            transform_id: transform_id.clone(),
            error_details_json: error_details.clone(),
            destination: destination.to_string(),
        };
        tables.transform_errors.push(record.clone());
        Ok(record)
    }

    fn record_sink_artifact(
        &self,
        state_id: &StateId,
        sink_name: &SinkName,
        descriptor: &ArtifactDescriptor,
    ) -> Result<SinkArtifactRecord, RecorderError> {
        let mut tables = self.lock();
        if !tables.states.contains_key(state_id) {
            return Err(RecorderError::Constraint(format!("unknown state {state_id}")));
        }
        let record = SinkArtifactRecord {
            artifact_id: tables.next("art"),
            state_id: state_id.clone(),
            sink_name: sink_name.clone(),
            artifact_type: descriptor.artifact_type.clone(),
            path_or_uri: descriptor.path_or_uri.clone(),
            size_bytes: descriptor.size_bytes,
            content_hash: descriptor.content_hash.clone(),
            metadata_json: descriptor.metadata.clone(),
        };
        tables.artifacts.push(record.clone());
        Ok(record)
    }
}
