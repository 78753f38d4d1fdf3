// crates/elspeth-core/src/core/mod.rs
// ============================================================================
// Module: ELSPETH Core Types
// Description: Canonical audit-record schema and pipeline configuration types.
// Purpose: Provide stable, serializable types for the Landscape and the engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! ELSPETH core types define the audit-trail schema (runs, nodes, edges, rows,
//! tokens, node states, routing events, calls, outcomes, errors, artifacts),
//! the canonical hashing rules, and the validated configuration records the
//! engine trusts at runtime. These types are the canonical source of truth for
//! every derived surface (store, CLI, telemetry exporters).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hashing;
pub mod identifiers;
pub mod lineage;
pub mod pipeline;
pub mod records;
pub mod results;
pub mod states;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::BranchName;
pub use identifiers::CallId;
pub use identifiers::CoalesceName;
pub use identifiers::EdgeId;
pub use identifiers::EventId;
pub use identifiers::NodeId;
pub use identifiers::RowId;
pub use identifiers::RunId;
pub use identifiers::SinkName;
pub use identifiers::StateId;
pub use identifiers::TokenId;
pub use lineage::ResumeState;
pub use lineage::RowProgress;
pub use lineage::TokenLineage;
pub use pipeline::AggregationOutputMode;
pub use pipeline::AggregationSpec;
pub use pipeline::BackpressureMode;
pub use pipeline::CheckpointConfig;
pub use pipeline::CoalescePolicy;
pub use pipeline::CoalesceSpec;
pub use pipeline::ConcurrencyConfig;
pub use pipeline::GatePlan;
pub use pipeline::MergeStrategy;
pub use pipeline::PipelinePlan;
pub use pipeline::PlanError;
pub use pipeline::RetryPolicy;
pub use pipeline::RouteTarget;
pub use pipeline::TransformPlanEntry;
pub use pipeline::TelemetryGranularity;
pub use pipeline::TelemetryRuntimeConfig;
pub use pipeline::ThrottleConfig;
pub use pipeline::TriggerSpec;
pub use pipeline::internal_defaults;
pub use records::CONTINUE_LABEL;
pub use records::EdgeMode;
pub use records::EdgeRecord;
pub use records::NodeRecord;
pub use records::NodeType;
pub use records::QUARANTINE_LABEL;
pub use records::RowRecord;
pub use records::RunRecord;
pub use records::RunStatus;
pub use records::TokenRecord;
pub use records::error_label;
pub use records::is_reserved_label;
pub use results::ErrorDisposition;
pub use results::GateResult;
pub use results::RoutingAction;
pub use results::RowData;
pub use results::RowResult;
pub use results::SourceItem;
pub use results::TransformResult;
pub use states::ArtifactDescriptor;
pub use states::CallRecord;
pub use states::CallStatus;
pub use states::CallType;
pub use states::NodeStateRecord;
pub use states::NodeStateStatus;
pub use states::RoutingEventRecord;
pub use states::SinkArtifactRecord;
pub use states::TokenOutcome;
pub use states::TokenOutcomeRecord;
pub use states::TransformErrorRecord;
pub use states::ValidationErrorRecord;
pub use self::time::Timestamp;
