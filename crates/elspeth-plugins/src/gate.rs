// crates/elspeth-plugins/src/gate.rs
// ============================================================================
// Module: Condition Gate
// Description: Config-driven gate routing on a condition expression.
// Purpose: Turn gate settings (condition + routes + fork_to) into a GatePlugin.
// Dependencies: elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! A condition gate evaluates one parsed expression per row and applies the
//! `pass` route when it holds, the `fail` route otherwise. Route targets map
//! onto routing actions: `continue`, a sink name, `fork` (expanding to the
//! gate's configured branches), or `discard`. Missing `pass`/`fail` routes
//! default to `continue`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_config::GateSettings;
use elspeth_core::core::identifiers::BranchName;
use elspeth_core::core::pipeline::RouteTarget;
use elspeth_core::core::results::GateResult;
use elspeth_core::core::results::RoutingAction;
use elspeth_core::core::results::RowData;
use elspeth_core::interfaces::plugins::GatePlugin;
use elspeth_core::interfaces::plugins::PluginContext;
use elspeth_core::interfaces::plugins::PluginError;
use serde_json::json;

use crate::condition::Condition;
use crate::condition::ConditionError;

// ============================================================================
// SECTION: Route Labels
// ============================================================================

/// Route label applied when the condition holds.
pub const PASS_LABEL: &str = "pass";
/// Route label applied when the condition fails.
pub const FAIL_LABEL: &str = "fail";

// ============================================================================
// SECTION: Condition Gate
// ============================================================================

/// Gate routing rows on one condition expression.
pub struct ConditionGate {
    /// Gate name.
    name: String,
    /// Parsed condition.
    condition: Condition,
    /// Target applied when the condition holds.
    on_pass: RouteTarget,
    /// Target applied when the condition fails.
    on_fail: RouteTarget,
    /// Fork branch labels for `fork` targets.
    fork_to: Vec<BranchName>,
}

impl ConditionGate {
    /// Builds a condition gate from its settings entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when the condition does not parse.
    pub fn from_settings(settings: &GateSettings) -> Result<Self, ConditionError> {
        let condition = Condition::parse(&settings.condition)?;
        let target_for = |label: &str| {
            settings
                .routes
                .get(label)
                .map_or(RouteTarget::Continue, |raw| elspeth_config::parse_route_target(raw))
        };
        Ok(Self {
            name: settings.name.clone(),
            condition,
            on_pass: target_for(PASS_LABEL),
            on_fail: target_for(FAIL_LABEL),
            fork_to: settings.fork_to.iter().map(BranchName::new).collect(),
        })
    }

    /// Converts a route target into a routing action.
    fn action_for(&self, target: &RouteTarget) -> Result<RoutingAction, PluginError> {
        match target {
            RouteTarget::Continue => Ok(RoutingAction::Continue),
            RouteTarget::Discard => Ok(RoutingAction::Discard),
            RouteTarget::Sink(sink) => Ok(RoutingAction::RouteToSink {
                sink: sink.clone(),
            }),
            RouteTarget::Fork => {
                if self.fork_to.is_empty() {
                    return Err(PluginError::Failed(format!(
                        "gate '{}' routes to fork without fork_to branches",
                        self.name
                    )));
                }
                Ok(RoutingAction::ForkToPaths {
                    branches: self.fork_to.clone(),
                })
            }
        }
    }
}

impl GatePlugin for ConditionGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn evaluate(&mut self, row: &RowData, _ctx: &PluginContext) -> Result<GateResult, PluginError> {
        let holds = self.condition.evaluate(row);
        let target = if holds { &self.on_pass } else { &self.on_fail };
        let action = self.action_for(target)?;
        let reason = json!({
            "gate": self.name,
            "condition": self.condition.source(),
            "result": holds,
        });
        Ok(GateResult {
            action,
            reason,
        })
    }
}
