// crates/elspeth-core/src/runtime/tokens.rs
// ============================================================================
// Module: ELSPETH Token Manager
// Description: Live tokens and their creation paths.
// Purpose: Allocate tokens for root admission, fork, coalesce merge, and resume.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! A token is a row-in-flight: the persisted [`crate::core::TokenRecord`]
//! plus the live row data the engine mutates as the token walks the graph.
//! Ownership is strictly linear: a token lives in exactly one place at a
//! time (work queue, coalesce hold set, or sink buffer).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::identifiers::BranchName;
use crate::core::identifiers::RowId;
use crate::core::identifiers::TokenId;
use crate::core::records::RowRecord;
use crate::core::results::RowData;
use crate::interfaces::recorder::Recorder;
use crate::interfaces::recorder::RecorderError;

// ============================================================================
// SECTION: Token
// ============================================================================

/// A row-in-flight: persisted identity plus live row data.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token identifier.
    pub token_id: TokenId,
    /// Row this token carries.
    pub row_id: RowId,
    /// Parent token for fork and merge children.
    pub parent_token_id: Option<TokenId>,
    /// Branch label set on fork children.
    pub branch_name: Option<BranchName>,
    /// Live row data, mutated as the token walks the graph.
    pub row_data: RowData,
}

// ============================================================================
// SECTION: Token Manager
// ============================================================================

/// Allocates tokens and records their parent/child relations.
pub struct TokenManager {
    /// Recorder used to persist token records.
    recorder: Arc<dyn Recorder>,
}

impl TokenManager {
    /// Creates a token manager backed by the given recorder.
    #[must_use]
    pub const fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
        }
    }

    /// Creates the root token for a freshly persisted source row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the token write fails.
    pub fn create_initial_token(
        &self,
        row: &RowRecord,
        row_data: RowData,
    ) -> Result<Token, RecorderError> {
        let record = self.recorder.create_token(&row.row_id, None, None)?;
        Ok(Token {
            token_id: record.token_id,
            row_id: record.row_id,
            parent_token_id: None,
            branch_name: None,
            row_data,
        })
    }

    /// Creates a fork child carrying a deep copy of the parent's row data.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the token write fails.
    pub fn fork_token(&self, parent: &Token, branch: &BranchName) -> Result<Token, RecorderError> {
        let record =
            self.recorder.create_token(&parent.row_id, Some(&parent.token_id), Some(branch))?;
        Ok(Token {
            token_id: record.token_id,
            row_id: record.row_id,
            parent_token_id: Some(parent.token_id.clone()),
            branch_name: Some(branch.clone()),
            row_data: parent.row_data.clone(),
        })
    }

    /// Creates the merged token produced by a coalesce, parented on one of
    /// the consumed children.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the token write fails.
    pub fn create_merged_token(
        &self,
        row_id: &RowId,
        parent: &TokenId,
        merged_data: RowData,
    ) -> Result<Token, RecorderError> {
        let record = self.recorder.create_token(row_id, Some(parent), None)?;
        Ok(Token {
            token_id: record.token_id,
            row_id: record.row_id,
            parent_token_id: Some(parent.clone()),
            branch_name: None,
            row_data: merged_data,
        })
    }

    /// Creates a fresh root token for a previously recorded row at resume
    /// time. The new token identifier keeps node-state uniqueness intact.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the token write fails.
    pub fn create_for_existing_row(
        &self,
        row_id: &RowId,
        row_data: RowData,
    ) -> Result<Token, RecorderError> {
        let record = self.recorder.create_token(row_id, None, None)?;
        Ok(Token {
            token_id: record.token_id,
            row_id: record.row_id,
            parent_token_id: None,
            branch_name: None,
            row_data,
        })
    }
}
