use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::field::FieldPath;

/// The computed effect of a set of changes on one derived document.
///
/// Impact records are never stored; they are recomputed from the current
/// documents and the selected changes whenever they are needed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImpactRecord {
    pub derived_document_id: Uuid,
    pub affected_fields: BTreeSet<FieldPath>,
    pub severity: Severity,
    pub auto_updateable: bool,
    pub requires_review: bool,
}

/// Impact severity, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A selected change that can no longer be applied as proposed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeConflict {
    pub change_id: Uuid,
    pub field_path: FieldPath,
    pub reason: ConflictReason,
    /// The old value recorded when the change was submitted.
    pub expected: Value,
    /// The root's live value at the field.
    pub actual: Value,
}

/// Why a selected change conflicts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The root's value moved since the change was submitted.
    StaleValue,
    AlreadyAccepted,
    AlreadyRejected,
}

/// Outcome of an apply call.
///
/// `cascaded_doc_ids` were handed to the regeneration collaborator;
/// `flagged_doc_ids` need manual attention, with the reason in
/// `flag_reasons`. `conflicts` is always empty on success: a conflicting
/// batch aborts with an error carrying the conflicts instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplyResult {
    pub applied_change_ids: Vec<Uuid>,
    pub cascaded_doc_ids: Vec<Uuid>,
    pub flagged_doc_ids: Vec<Uuid>,
    pub conflicts: Vec<ChangeConflict>,
    pub flag_reasons: BTreeMap<Uuid, String>,
}

/// Append-only record of a cascade reaching a derived document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeEvent {
    pub id: Uuid,
    pub derived_document_id: Uuid,
    pub root_id: Uuid,
    pub outcome: CascadeOutcome,
    pub triggering_fields: BTreeSet<FieldPath>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What happened to a derived document during a cascade.
///
/// - `Regenerating`: handed to the regeneration collaborator
/// - `Flagged`: impacted but not approved for automatic regeneration
/// - `Failed`: regeneration failed or timed out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CascadeOutcome {
    Regenerating,
    Flagged,
    Failed,
}

impl CascadeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regenerating => "regenerating",
            Self::Flagged => "flagged",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "regenerating" => Some(Self::Regenerating),
            "flagged" => Some(Self::Flagged),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
