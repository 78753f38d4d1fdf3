// crates/elspeth-core/src/core/identifiers.rs
// ============================================================================
// Module: ELSPETH Identifiers
// Description: Canonical opaque identifiers for audit-trail records.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout ELSPETH.
//! Identifiers are opaque strings assigned by the recorder; the engine never
//! parses or interprets their contents. Names (`SinkName`, `BranchName`,
//! `CoalesceName`) are user-chosen labels carried verbatim through the audit
//! trail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier with the standard conversions.
macro_rules! string_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// # Invariants
        /// - Opaque UTF-8 string; no normalization or validation is applied by this type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_identifier! {
    /// Run identifier for one pipeline execution.
    RunId
}

string_identifier! {
    /// Node identifier within a persisted execution graph.
    NodeId
}

string_identifier! {
    /// Edge identifier within a persisted execution graph.
    EdgeId
}

string_identifier! {
    /// Row identifier for a source row persisted on first observation.
    RowId
}

string_identifier! {
    /// Token identifier for a row-in-flight.
    TokenId
}

string_identifier! {
    /// Node-state identifier for one token visit to one node.
    StateId
}

string_identifier! {
    /// Routing-event identifier.
    EventId
}

string_identifier! {
    /// External-call identifier.
    CallId
}

string_identifier! {
    /// User-chosen sink name from the pipeline configuration.
    SinkName
}

string_identifier! {
    /// Branch label carried by fork children until coalesce or termination.
    BranchName
}

string_identifier! {
    /// Name of a configured coalesce merge point.
    CoalesceName
}
