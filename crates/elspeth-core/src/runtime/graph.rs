// crates/elspeth-core/src/runtime/graph.rs
// ============================================================================
// Module: ELSPETH Execution Graph
// Description: DAG construction, persistence, and validation.
// Purpose: Build the persisted execution graph from a validated pipeline plan
//          and expose the lookups the processor and orchestrator need.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! The graph is built once per run: spine edges, gate routes, fork and
//! coalesce edges, and reserved DIVERT edges, all registered through the
//! recorder so the audit trail carries the complete topology. Construction
//! validates acyclicity, reachability, and label uniqueness; a missing edge
//! at lookup time afterwards is an engine bug and fails the run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use thiserror::Error;
use tracing::warn;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::CoalesceName;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::pipeline::CoalescePolicy;
use crate::core::pipeline::PipelinePlan;
use crate::core::pipeline::RouteTarget;
use crate::core::records::CONTINUE_LABEL;
use crate::core::records::EdgeMode;
use crate::core::records::EdgeRecord;
use crate::core::records::QUARANTINE_LABEL;
use crate::core::records::error_label;
use crate::core::results::ErrorDisposition;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::recorder::RecorderError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Execution-graph errors.
///
/// # Invariants
/// - `Validation` is a configuration error raised at construction (Tier 2).
/// - The remaining variants indicate engine bugs at lookup time (Tier 1).
#[derive(Debug, Error)]
pub enum GraphError {
    /// Structural validation failed at construction.
    #[error("graph validation failed: {0}")]
    Validation(String),
    /// A required edge is missing from the edge map.
    #[error("graph edge missing: {from}:{label}")]
    MissingEdge {
        /// Origin node.
        from: NodeId,
        /// Expected label.
        label: String,
    },
    /// A required node is missing from the graph.
    #[error("graph node missing: {0}")]
    MissingNode(String),
    /// Registering the graph in the audit store failed.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

// ============================================================================
// SECTION: Node Identifier Bundle
// ============================================================================

/// Node identifiers registered by the orchestrator before graph construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNodeIds {
    /// Source node.
    pub source: NodeId,
    /// Transform nodes in spine order.
    pub transforms: Vec<NodeId>,
    /// Gate nodes in declaration order.
    pub gates: Vec<NodeId>,
    /// Coalesce nodes by name.
    pub coalesces: BTreeMap<CoalesceName, NodeId>,
    /// Aggregation nodes keyed by the transform label they follow.
    pub aggregations: BTreeMap<String, NodeId>,
    /// Sink nodes by name.
    pub sinks: BTreeMap<SinkName, NodeId>,
}

// ============================================================================
// SECTION: Execution Graph
// ============================================================================

/// Constructed and persisted execution graph for one run.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Source node.
    source: NodeId,
    /// Persisted edges in registration order.
    edges: Vec<EdgeRecord>,
    /// `(from, label)` to edge lookup.
    edge_map: BTreeMap<(NodeId, String), EdgeId>,
    /// 0-based producing-gate index per coalesce.
    coalesce_gate_index: BTreeMap<CoalesceName, usize>,
    /// Branch label to coalesce lookup.
    branch_to_coalesce: BTreeMap<BranchName, CoalesceName>,
    /// Coalesce nodes by name.
    coalesce_nodes: BTreeMap<CoalesceName, NodeId>,
    /// Sink nodes by name.
    sink_nodes: BTreeMap<SinkName, NodeId>,
}

impl ExecutionGraph {
    /// Builds, validates, and persists the execution graph.
    ///
    /// The plan must already have passed [`PipelinePlan::validate`]; this
    /// constructor re-derives the coalesce-gate index, registers every edge,
    /// and then checks acyclicity and reachability over the registered set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Validation`] for structural problems and
    /// [`GraphError::Recorder`] when edge registration fails.
    pub fn build(
        recorder: &dyn Recorder,
        run_id: &RunId,
        plan: &PipelinePlan,
        ids: &GraphNodeIds,
    ) -> Result<Self, GraphError> {
        let coalesce_gate_index =
            plan.validate().map_err(|err| GraphError::Validation(err.to_string()))?;
        let branch_to_coalesce = plan.branch_to_coalesce();
        warn_on_error_routes_under_require_all(plan);

        let mut edges = Vec::new();
        let mut register = |from: &NodeId,
                            to: &NodeId,
                            label: &str,
                            mode: EdgeMode|
         -> Result<(), GraphError> {
            let edge = recorder.register_edge(run_id, from, to, label, mode)?;
            edges.push(edge);
            Ok(())
        };

        // Spine: source -> transforms -> (first gate | default sink).
        let default_sink_node = ids
            .sinks
            .get(&plan.default_sink)
            .ok_or_else(|| GraphError::MissingNode(plan.default_sink.to_string()))?;
        let mut spine: Vec<&NodeId> = Vec::with_capacity(plan.transforms.len() + 2);
        spine.push(&ids.source);
        spine.extend(ids.transforms.iter());
        spine.extend(ids.gates.iter());
        spine.push(default_sink_node);
        for pair in spine.windows(2) {
            register(pair[0], pair[1], CONTINUE_LABEL, EdgeMode::Move)?;
        }

        // Gate routes and fork edges.
        for (gate_index, gate) in plan.gates.iter().enumerate() {
            let gate_node = ids
                .gates
                .get(gate_index)
                .ok_or_else(|| GraphError::MissingNode(gate.name.clone()))?;
            for (label, target) in &gate.routes {
                if let RouteTarget::Sink(sink) = target {
                    let is_fork_branch = gate.fork_to.iter().any(|branch| branch.as_str() == label);
                    let sink_node = ids
                        .sinks
                        .get(sink)
                        .ok_or_else(|| GraphError::MissingNode(sink.to_string()))?;
                    let mode = if is_fork_branch { EdgeMode::Copy } else { EdgeMode::Move };
                    register(gate_node, sink_node, label, mode)?;
                }
            }
            for branch in &gate.fork_to {
                if let Some(coalesce) = branch_to_coalesce.get(branch) {
                    let coalesce_node = ids
                        .coalesces
                        .get(coalesce)
                        .ok_or_else(|| GraphError::MissingNode(coalesce.to_string()))?;
                    register(gate_node, coalesce_node, branch.as_str(), EdgeMode::Copy)?;
                }
            }
        }

        // Coalesce downstream edges.
        for coalesce in &plan.coalesces {
            let coalesce_node = ids
                .coalesces
                .get(&coalesce.name)
                .ok_or_else(|| GraphError::MissingNode(coalesce.name.to_string()))?;
            let gate_index = coalesce_gate_index
                .get(&coalesce.name)
                .copied()
                .ok_or_else(|| GraphError::MissingNode(coalesce.name.to_string()))?;
            let downstream: &NodeId = ids.gates.get(gate_index + 1).unwrap_or(default_sink_node);
            register(coalesce_node, downstream, CONTINUE_LABEL, EdgeMode::Move)?;
        }

        // Aggregation edges: transform -> aggregation -> default sink.
        for (transform_label, aggregation_node) in &ids.aggregations {
            let transform_index = plan
                .transforms
                .iter()
                .position(|entry| &entry.label == transform_label)
                .ok_or_else(|| GraphError::MissingNode(transform_label.clone()))?;
            let transform_node = ids
                .transforms
                .get(transform_index)
                .ok_or_else(|| GraphError::MissingNode(transform_label.clone()))?;
            register(transform_node, aggregation_node, "aggregate", EdgeMode::Move)?;
            register(aggregation_node, default_sink_node, CONTINUE_LABEL, EdgeMode::Move)?;
        }

        // DIVERT edges: quarantine and per-transform error sinks.
        if let ErrorDisposition::Route(sink) = &plan.on_validation_failure {
            let sink_node =
                ids.sinks.get(sink).ok_or_else(|| GraphError::MissingNode(sink.to_string()))?;
            register(&ids.source, sink_node, QUARANTINE_LABEL, EdgeMode::Divert)?;
        }
        for (transform_index, transform) in plan.transforms.iter().enumerate() {
            if let ErrorDisposition::Route(sink) = &transform.on_error {
                let transform_node = ids
                    .transforms
                    .get(transform_index)
                    .ok_or_else(|| GraphError::MissingNode(transform.label.clone()))?;
                let sink_node =
                    ids.sinks.get(sink).ok_or_else(|| GraphError::MissingNode(sink.to_string()))?;
                register(transform_node, sink_node, &error_label(transform_index), EdgeMode::Divert)?;
            }
        }

        let mut edge_map = BTreeMap::new();
        for edge in &edges {
            let key = (edge.from_node_id.clone(), edge.label.clone());
            if edge_map.insert(key, edge.edge_id.clone()).is_some() {
                return Err(GraphError::Validation(format!(
                    "duplicate edge label '{}' on node {}",
                    edge.label, edge.from_node_id
                )));
            }
        }

        let graph = Self {
            source: ids.source.clone(),
            edges,
            edge_map,
            coalesce_gate_index,
            branch_to_coalesce,
            coalesce_nodes: ids.coalesces.clone(),
            sink_nodes: ids.sinks.clone(),
        };
        graph.check_acyclic_and_reachable(ids)?;
        Ok(graph)
    }

    /// Returns the source node.
    #[must_use]
    pub const fn get_source(&self) -> &NodeId {
        &self.source
    }

    /// Returns every persisted edge in registration order.
    #[must_use]
    pub fn get_edges(&self) -> &[EdgeRecord] {
        &self.edges
    }

    /// Looks up an edge by origin node and label.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingEdge`]; a miss here is an engine bug.
    pub fn edge(&self, from: &NodeId, label: &str) -> Result<&EdgeId, GraphError> {
        self.edge_map.get(&(from.clone(), label.to_string())).ok_or_else(|| {
            GraphError::MissingEdge {
                from: from.clone(),
                label: label.to_string(),
            }
        })
    }

    /// Returns the 0-based producing-gate index per coalesce.
    #[must_use]
    pub const fn get_coalesce_gate_index(&self) -> &BTreeMap<CoalesceName, usize> {
        &self.coalesce_gate_index
    }

    /// Returns the branch-to-coalesce lookup.
    #[must_use]
    pub const fn get_branch_to_coalesce_map(&self) -> &BTreeMap<BranchName, CoalesceName> {
        &self.branch_to_coalesce
    }

    /// Returns the coalesce node map.
    #[must_use]
    pub const fn get_coalesce_id_map(&self) -> &BTreeMap<CoalesceName, NodeId> {
        &self.coalesce_nodes
    }

    /// Looks up a sink node by name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingNode`]; a miss here is an engine bug
    /// because sink names were validated at construction.
    pub fn sink_node(&self, sink: &SinkName) -> Result<&NodeId, GraphError> {
        self.sink_nodes.get(sink).ok_or_else(|| GraphError::MissingNode(sink.to_string()))
    }

    /// Verifies the registered edge set is acyclic and every node is
    /// reachable from the source.
    fn check_acyclic_and_reachable(&self, ids: &GraphNodeIds) -> Result<(), GraphError> {
        let mut adjacency: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();
        for edge in &self.edges {
            adjacency.entry(&edge.from_node_id).or_default().push(&edge.to_node_id);
        }

        // Breadth-first reachability from the source.
        let mut reachable: BTreeSet<&NodeId> = BTreeSet::new();
        let mut frontier = VecDeque::from([&self.source]);
        while let Some(node) = frontier.pop_front() {
            if !reachable.insert(node) {
                continue;
            }
            if let Some(next) = adjacency.get(node) {
                frontier.extend(next.iter().copied());
            }
        }
        let mut all_nodes: Vec<&NodeId> = vec![&ids.source];
        all_nodes.extend(ids.transforms.iter());
        all_nodes.extend(ids.gates.iter());
        all_nodes.extend(ids.coalesces.values());
        all_nodes.extend(ids.aggregations.values());
        all_nodes.extend(ids.sinks.values());
        for node in all_nodes.iter().copied() {
            if !reachable.contains(node) {
                return Err(GraphError::Validation(format!(
                    "node {node} is not reachable from the source"
                )));
            }
        }

        // Depth-first cycle detection with an explicit color map.
        let mut color: BTreeMap<&NodeId, u8> = BTreeMap::new();
        for node in all_nodes.iter().copied() {
            if color.get(node).copied().unwrap_or(0) == 0
                && has_cycle_from(node, &adjacency, &mut color)
            {
                return Err(GraphError::Validation("execution graph contains a cycle".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Iterative DFS cycle check; colors are 0 = white, 1 = gray, 2 = black.
fn has_cycle_from<'a>(
    start: &'a NodeId,
    adjacency: &BTreeMap<&'a NodeId, Vec<&'a NodeId>>,
    color: &mut BTreeMap<&'a NodeId, u8>,
) -> bool {
    let mut stack: Vec<(&NodeId, usize)> = vec![(start, 0)];
    color.insert(start, 1);
    while let Some((node, next_child)) = stack.pop() {
        let children = adjacency.get(node).map_or(&[] as &[&NodeId], Vec::as_slice);
        if next_child < children.len() {
            stack.push((node, next_child + 1));
            let child = children[next_child];
            match color.get(child).copied().unwrap_or(0) {
                0 => {
                    color.insert(child, 1);
                    stack.push((child, 0));
                }
                1 => return true,
                _ => {}
            }
        } else {
            color.insert(node, 2);
        }
    }
    false
}

/// Emits the non-fatal semantic-trap warning: error-routing a spine transform
/// to a sink while a `require_all` coalesce is configured silently violates
/// the coalesce when a branch is lost to that route.
fn warn_on_error_routes_under_require_all(plan: &PipelinePlan) {
    let has_require_all =
        plan.coalesces.iter().any(|coalesce| coalesce.policy == CoalescePolicy::RequireAll);
    if !has_require_all {
        return;
    }
    for transform in &plan.transforms {
        if let ErrorDisposition::Route(sink) = &transform.on_error {
            warn!(
                transform = %transform.label,
                sink = %sink,
                "transform error route can starve a require_all coalesce: \
                 an error-routed branch never arrives and fails the merge"
            );
        }
    }
}
