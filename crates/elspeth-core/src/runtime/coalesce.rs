// crates/elspeth-core/src/runtime/coalesce.rs
// ============================================================================
// Module: ELSPETH Coalesce Executor
// Description: Per-row state machine merging fork branches.
// Purpose: Resolve fork children into one merged token (or an audited failure)
//          under require_all, quorum, best_effort, and first policies.
// Dependencies: crate::core, crate::runtime::tokens, serde_json
// ============================================================================

//! ## Overview
//! A pending merge exists per `(coalesce, row)`. Arrivals, losses, timeouts,
//! and the final flush each re-evaluate the policy and either hold, merge, or
//! fail. Every consumed token surfaces in a resolution so the processor can
//! record its terminal outcome; no token is allowed to vanish. All calls
//! come from the processor's single-threaded work loop; no internal locking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::CoalesceName;
use crate::core::identifiers::RowId;
use crate::core::identifiers::TokenId;
use crate::core::pipeline::CoalescePolicy;
use crate::core::pipeline::CoalesceSpec;
use crate::core::pipeline::MergeStrategy;
use crate::core::results::RowData;
use crate::core::states::TokenOutcome;
use crate::runtime::tokens::Token;

// ============================================================================
// SECTION: Resolutions
// ============================================================================

/// Successful merge resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCoalesce {
    /// Coalesce name.
    pub name: CoalesceName,
    /// Row the merge belongs to.
    pub row_id: RowId,
    /// Merged row data.
    pub merged_row: RowData,
    /// Parent for the merged token: the first arrived child.
    pub primary_parent: TokenId,
    /// Consumed children in arrival order.
    pub contributors: Vec<Token>,
    /// Canonical merge metadata blob.
    pub metadata: Value,
    /// Pipeline step of the coalesce point.
    pub step: u32,
}

/// Failure resolution: the policy could not be satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCoalesce {
    /// Coalesce name.
    pub name: CoalesceName,
    /// Row the failure belongs to.
    pub row_id: RowId,
    /// Human-readable failure reason.
    pub reason: String,
    /// Consumed children that had arrived, in arrival order.
    pub consumed: Vec<Token>,
    /// Canonical merge metadata blob.
    pub metadata: Value,
    /// Pipeline step of the coalesce point.
    pub step: u32,
}

/// Outcome of one coalesce operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CoalesceResolution {
    /// Token held; merge condition not yet met.
    Held,
    /// Merge condition met.
    Merged(MergedCoalesce),
    /// Policy violated; arrived siblings fail.
    Failed(FailedCoalesce),
    /// Late arrival at an already-resolved merge; consume with the outcome.
    Consumed {
        /// Coalesce name.
        name: CoalesceName,
        /// Consumed token.
        token: Token,
        /// Terminal outcome for the late token.
        outcome: TokenOutcome,
    },
}

// ============================================================================
// SECTION: Pending State
// ============================================================================

/// How a resolved `(coalesce, row)` ended, for late arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvedKind {
    /// Resolved by a merge; late siblings are consumed as coalesced.
    Merged,
    /// Resolved by a failure; late siblings fail.
    Failed,
}

/// Pending merge state for one `(coalesce, row)`.
#[derive(Debug)]
struct PendingMerge {
    /// Arrived children in arrival order.
    arrived: Vec<(BranchName, Token)>,
    /// Instant of the first arrival; unset while only losses were reported.
    first_arrival: Option<Instant>,
    /// Lost branches with their loss reasons.
    lost: BTreeMap<BranchName, String>,
}

impl PendingMerge {
    /// Creates an empty pending merge.
    const fn new() -> Self {
        Self {
            arrived: Vec::new(),
            first_arrival: None,
            lost: BTreeMap::new(),
        }
    }

    /// Returns the wait duration since first arrival, zero when none arrived.
    fn wait_duration(&self, now: Instant) -> Duration {
        self.first_arrival.map_or(Duration::ZERO, |first| now.saturating_duration_since(first))
    }
}

// ============================================================================
// SECTION: Coalesce Executor
// ============================================================================

/// Per-row state machine merging fork branches at named coalesce points.
///
/// # Invariants
/// - Every consumed token appears in exactly one resolution.
/// - A resolved `(coalesce, row)` never merges again; late arrivals are
///   consumed with the resolution's outcome.
#[derive(Debug)]
pub struct CoalesceExecutor {
    /// Coalesce specs by name.
    specs: BTreeMap<CoalesceName, CoalesceSpec>,
    /// Pipeline step per coalesce.
    steps: BTreeMap<CoalesceName, u32>,
    /// Pending merges by `(coalesce, row)`.
    pending: BTreeMap<(CoalesceName, RowId), PendingMerge>,
    /// Resolution memory for late arrivals.
    resolved: BTreeMap<(CoalesceName, RowId), ResolvedKind>,
}

impl CoalesceExecutor {
    /// Creates an executor for the configured coalesce points.
    #[must_use]
    pub fn new(specs: Vec<CoalesceSpec>, steps: BTreeMap<CoalesceName, u32>) -> Self {
        let specs = specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect();
        Self {
            specs,
            steps,
            pending: BTreeMap::new(),
            resolved: BTreeMap::new(),
        }
    }

    /// Returns the pipeline step configured for a coalesce.
    #[must_use]
    pub fn step_of(&self, name: &CoalesceName) -> Option<u32> {
        self.steps.get(name).copied()
    }

    /// Reports whether any pending merges remain.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Accepts an arriving fork child at a coalesce point.
    ///
    /// Unknown coalesce names or children without a branch label are engine
    /// bugs surfaced as failure resolutions by the caller's Tier-1 handling;
    /// this method returns `None` for them so the processor can crash loudly.
    #[must_use]
    pub fn accept(&mut self, name: &CoalesceName, token: Token, now: Instant) -> Option<CoalesceResolution> {
        let spec = self.specs.get(name)?;
        let branch = token.branch_name.clone()?;
        let key = (name.clone(), token.row_id.clone());

        if let Some(kind) = self.resolved.get(&key) {
            let outcome = match kind {
                ResolvedKind::Merged => TokenOutcome::Coalesced,
                ResolvedKind::Failed => TokenOutcome::Failed,
            };
            return Some(CoalesceResolution::Consumed {
                name: name.clone(),
                token,
                outcome,
            });
        }

        let pending = self.pending.entry(key.clone()).or_insert_with(PendingMerge::new);
        if pending.first_arrival.is_none() {
            pending.first_arrival = Some(now);
        }
        pending.arrived.push((branch, token));

        let expected = spec.branches.len();
        let arrived = pending.arrived.len();
        let lost = pending.lost.len();
        let decision = match spec.policy {
            CoalescePolicy::RequireAll => {
                if lost > 0 {
                    PolicyDecision::Fail(format!(
                        "require_all coalesce lost branches: {}",
                        lost_branch_list(&pending.lost)
                    ))
                } else if arrived == expected {
                    PolicyDecision::Merge
                } else {
                    PolicyDecision::Hold
                }
            }
            CoalescePolicy::Quorum => {
                let quorum = spec.quorum_count.unwrap_or(expected);
                let remaining = expected.saturating_sub(lost + arrived);
                if arrived >= quorum {
                    PolicyDecision::Merge
                } else if arrived + remaining < quorum {
                    PolicyDecision::Fail(format!(
                        "quorum {quorum} unreachable: {arrived} arrived, {lost} lost"
                    ))
                } else {
                    PolicyDecision::Hold
                }
            }
            CoalescePolicy::BestEffort => {
                if arrived + lost >= expected {
                    PolicyDecision::Merge
                } else {
                    PolicyDecision::Hold
                }
            }
            CoalescePolicy::First => PolicyDecision::Merge,
        };

        Some(self.resolve_decision(&key, decision, now))
    }

    /// Records that a branch will never arrive and re-evaluates the policy.
    ///
    /// Returns `None` when nothing changes (no pending state and a policy
    /// that tolerates the loss without immediate resolution).
    #[must_use]
    pub fn notify_branch_lost(
        &mut self,
        name: &CoalesceName,
        row_id: &RowId,
        branch: &BranchName,
        reason: &str,
        now: Instant,
    ) -> Option<CoalesceResolution> {
        let spec = self.specs.get(name)?;
        let key = (name.clone(), row_id.clone());
        if self.resolved.contains_key(&key) {
            return None;
        }
        let pending = self.pending.entry(key.clone()).or_insert_with(PendingMerge::new);
        pending.lost.insert(branch.clone(), reason.to_string());

        let expected = spec.branches.len();
        let arrived = pending.arrived.len();
        let lost = pending.lost.len();
        let decision = match spec.policy {
            CoalescePolicy::RequireAll => PolicyDecision::Fail(format!(
                "require_all coalesce lost branch '{branch}': {reason}"
            )),
            CoalescePolicy::Quorum => {
                let quorum = spec.quorum_count.unwrap_or(expected);
                let possible = expected.saturating_sub(lost);
                if possible < quorum {
                    PolicyDecision::Fail(format!(
                        "quorum {quorum} unreachable after losing '{branch}'"
                    ))
                } else {
                    PolicyDecision::Hold
                }
            }
            CoalescePolicy::BestEffort => {
                if arrived + lost >= expected {
                    if arrived == 0 {
                        PolicyDecision::Fail("best_effort coalesce lost every branch".to_string())
                    } else {
                        PolicyDecision::Merge
                    }
                } else {
                    PolicyDecision::Hold
                }
            }
            CoalescePolicy::First => PolicyDecision::Hold,
        };

        match decision {
            PolicyDecision::Hold => {
                // Nothing arrived and nothing resolved; keep the loss on file.
                None
            }
            other => Some(self.resolve_decision(&key, other, now)),
        }
    }

    /// Resolves pendings whose wait exceeded their configured timeout.
    #[must_use]
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<CoalesceResolution> {
        let mut due: Vec<(CoalesceName, RowId)> = Vec::new();
        for ((name, row_id), pending) in &self.pending {
            let Some(spec) = self.specs.get(name) else {
                continue;
            };
            let Some(timeout_ms) = spec.timeout_ms else {
                continue;
            };
            let Some(first) = pending.first_arrival else {
                continue;
            };
            if now.saturating_duration_since(first) >= Duration::from_millis(timeout_ms) {
                due.push((name.clone(), row_id.clone()));
            }
        }
        due.into_iter().map(|key| self.resolve_forced(&key, "timeout", now)).collect()
    }

    /// Forces resolution of every remaining pending at source exhaustion.
    #[must_use]
    pub fn flush_pending(&mut self, now: Instant) -> Vec<CoalesceResolution> {
        let keys: Vec<(CoalesceName, RowId)> = self.pending.keys().cloned().collect();
        keys.into_iter().map(|key| self.resolve_forced(&key, "source exhausted", now)).collect()
    }

    /// Applies the forced-resolution rules for timeouts and flushes.
    fn resolve_forced(
        &mut self,
        key: &(CoalesceName, RowId),
        cause: &str,
        now: Instant,
    ) -> CoalesceResolution {
        let (spec_policy, quorum, expected) = match self.specs.get(&key.0) {
            Some(spec) => {
                (spec.policy, spec.quorum_count.unwrap_or(spec.branches.len()), spec.branches.len())
            }
            None => (CoalescePolicy::RequireAll, 0, 0),
        };
        let arrived = self.pending.get(key).map_or(0, |pending| pending.arrived.len());
        let decision = match spec_policy {
            CoalescePolicy::RequireAll => {
                if arrived == expected && expected > 0 {
                    PolicyDecision::Merge
                } else {
                    PolicyDecision::Fail(format!(
                        "require_all coalesce unresolved at {cause}: {arrived}/{expected} arrived"
                    ))
                }
            }
            CoalescePolicy::Quorum => {
                if arrived >= quorum {
                    PolicyDecision::Merge
                } else {
                    PolicyDecision::Fail(format!(
                        "quorum coalesce unresolved at {cause}: {arrived}/{quorum} arrived"
                    ))
                }
            }
            CoalescePolicy::BestEffort | CoalescePolicy::First => {
                if arrived > 0 {
                    PolicyDecision::Merge
                } else {
                    PolicyDecision::Fail(format!("no branch arrived before {cause}"))
                }
            }
        };
        self.resolve_decision(key, decision, now)
    }

    /// Converts a policy decision into a resolution, consuming the pending.
    fn resolve_decision(
        &mut self,
        key: &(CoalesceName, RowId),
        decision: PolicyDecision,
        now: Instant,
    ) -> CoalesceResolution {
        match decision {
            PolicyDecision::Hold => CoalesceResolution::Held,
            PolicyDecision::Merge => {
                let pending = self.pending.remove(key).unwrap_or_else(PendingMerge::new);
                self.resolved.insert(key.clone(), ResolvedKind::Merged);
                self.build_merged(key, pending, now)
            }
            PolicyDecision::Fail(reason) => {
                let pending = self.pending.remove(key).unwrap_or_else(PendingMerge::new);
                self.resolved.insert(key.clone(), ResolvedKind::Failed);
                let metadata = self.metadata_blob(&key.0, &pending, now);
                CoalesceResolution::Failed(FailedCoalesce {
                    name: key.0.clone(),
                    row_id: key.1.clone(),
                    reason,
                    consumed: pending.arrived.into_iter().map(|(_, token)| token).collect(),
                    metadata,
                    step: self.steps.get(&key.0).copied().unwrap_or(0),
                })
            }
        }
    }

    /// Builds the merged resolution from an accepted pending.
    fn build_merged(
        &self,
        key: &(CoalesceName, RowId),
        pending: PendingMerge,
        now: Instant,
    ) -> CoalesceResolution {
        let metadata = self.metadata_blob(&key.0, &pending, now);
        let spec = self.specs.get(&key.0);
        let merged_row = match spec {
            Some(spec) => merge_rows(spec, &pending.arrived),
            None => Err("unknown coalesce".to_string()),
        };
        match merged_row {
            Ok(merged_row) => {
                let primary_parent = pending
                    .arrived
                    .first()
                    .map(|(_, token)| token.token_id.clone())
                    .unwrap_or_else(|| TokenId::new(""));
                CoalesceResolution::Merged(MergedCoalesce {
                    name: key.0.clone(),
                    row_id: key.1.clone(),
                    merged_row,
                    primary_parent,
                    contributors: pending.arrived.into_iter().map(|(_, token)| token).collect(),
                    metadata,
                    step: self.steps.get(&key.0).copied().unwrap_or(0),
                })
            }
            Err(reason) => CoalesceResolution::Failed(FailedCoalesce {
                name: key.0.clone(),
                row_id: key.1.clone(),
                reason,
                consumed: pending.arrived.into_iter().map(|(_, token)| token).collect(),
                metadata,
                step: self.steps.get(&key.0).copied().unwrap_or(0),
            }),
        }
    }

    /// Builds the canonical merge metadata blob.
    fn metadata_blob(&self, name: &CoalesceName, pending: &PendingMerge, now: Instant) -> Value {
        let spec = self.specs.get(name);
        let arrival_order: Vec<&str> =
            pending.arrived.iter().map(|(branch, _)| branch.as_str()).collect();
        let lost: BTreeMap<&str, &str> =
            pending.lost.iter().map(|(branch, reason)| (branch.as_str(), reason.as_str())).collect();
        let wait_ms = u64::try_from(pending.wait_duration(now).as_millis()).unwrap_or(u64::MAX);
        json!({
            "policy": spec.map(|spec| spec.policy),
            "merge": spec.map(|spec| spec.merge),
            "expected_branches": spec.map(|spec| &spec.branches),
            "arrived": arrival_order,
            "lost_branches": lost,
            "arrival_order": arrival_order,
            "wait_duration_ms": wait_ms,
        })
    }
}

/// Internal policy evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PolicyDecision {
    /// Keep waiting.
    Hold,
    /// Merge now.
    Merge,
    /// Fail now with a reason.
    Fail(String),
}

// ============================================================================
// SECTION: Merge Strategies
// ============================================================================

/// Formats the lost-branch map for failure reasons.
fn lost_branch_list(lost: &BTreeMap<BranchName, String>) -> String {
    lost.keys().map(BranchName::as_str).collect::<Vec<_>>().join(", ")
}

/// Merges arrived rows per the configured strategy.
fn merge_rows(
    spec: &CoalesceSpec,
    arrived: &[(BranchName, Token)],
) -> Result<RowData, String> {
    match spec.merge {
        MergeStrategy::Union => Ok(merge_union(arrived)),
        MergeStrategy::SelectBranch => {
            let selected = spec
                .select_branch
                .as_ref()
                .ok_or_else(|| "select_branch merge without a selected branch".to_string())?;
            arrived
                .iter()
                .find(|(branch, _)| branch == selected)
                .map(|(_, token)| token.row_data.clone())
                .ok_or_else(|| format!("selected branch '{selected}' did not arrive"))
        }
        MergeStrategy::Custom => {
            let mut branches = serde_json::Map::new();
            for (branch, token) in arrived {
                branches
                    .insert(branch.as_str().to_string(), Value::Object(token.row_data.clone()));
            }
            let mut out = RowData::new();
            out.insert("branches".to_string(), Value::Object(branches));
            Ok(out)
        }
    }
}

/// Shallow union merge in arrival order, last writer wins, with nested
/// objects merged recursively one level.
fn merge_union(arrived: &[(BranchName, Token)]) -> RowData {
    let mut merged = RowData::new();
    for (_, token) in arrived {
        for (field, value) in &token.row_data {
            match (merged.get_mut(field), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (nested_key, nested_value) in incoming {
                        existing.insert(nested_key.clone(), nested_value.clone());
                    }
                }
                (_, value) => {
                    merged.insert(field.clone(), value.clone());
                }
            }
        }
    }
    merged
}
