// crates/elspeth-store-sqlite/src/lib.rs
// ============================================================================
// Module: ELSPETH SQLite Store Library
// Description: Durable Landscape recorder and lineage reader over SQLite.
// Purpose: Expose the store, its configuration, and the read-side queries.
// Dependencies: elspeth-core, rusqlite
// ============================================================================

//! ## Overview
//! The Landscape's durable backend: a [`SqliteRecorder`] implementing the
//! engine's recorder contract over a WAL-mode `SQLite` database with enforced
//! uniqueness and foreign keys, plus the read side: token lineage for
//! `explain`, resume cursors, and integrity verification.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod lineage;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use lineage::VerificationCheck;
pub use lineage::VerificationReport;
pub use store::SqliteRecorder;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
