//! Error taxonomy for the review and cascade operations.

use thiserror::Error;

use crate::models::ChangeConflict;

/// Errors that abort an operation as a whole.
///
/// Per-document regeneration failures are not errors: they are recovered
/// into [`ApplyResult::flagged_doc_ids`](crate::models::ApplyResult).
#[derive(Debug, Error)]
pub enum CascadeError {
    /// Malformed input: empty batch, bad field path, ineligible target.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown root, derived document or change id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Selected changes no longer agree with the root's live state.
    #[error("{} change(s) conflict with the current root document", .0.len())]
    Conflict(Vec<ChangeConflict>),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CascadeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

pub type CascadeResult<T> = Result<T, CascadeError>;
