use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::field::FieldPath;

/// A proposed, immutable edit to one field of a root document.
///
/// `old_value` is the root's value at submission time and drives the
/// optimistic concurrency check when the change is applied. A change is
/// resolved exactly once, by acceptance (merged into the root) or rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingChange {
    pub id: Uuid,
    pub root_id: Uuid,
    pub field_path: FieldPath,
    pub old_value: Value,
    pub new_value: Value,
    pub proposed_by: Provenance,
    pub resolution: Resolution,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingChange {
    pub fn is_unresolved(&self) -> bool {
        self.resolution == Resolution::Unresolved
    }
}

/// Who proposed a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    User,
    Expert,
    System,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Expert => "expert",
            Self::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "expert" => Some(Self::Expert),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// How a pending change was resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    Accepted,
    Rejected,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(Self::Unresolved),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Input for proposing a change to a root field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitChangeInput {
    /// Caller-supplied id. Resubmitting the same change with the same id
    /// returns the stored change instead of creating a duplicate.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub field_path: FieldPath,
    pub new_value: Value,
    pub proposed_by: Provenance,
}

/// Input selecting a subset of a root's pending changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSelection {
    pub change_ids: Vec<Uuid>,
}

/// Input for applying a batch of changes and cascading to approved targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyChangesInput {
    pub change_ids: Vec<Uuid>,
    /// Derived documents the reviewer approved for automatic regeneration.
    #[serde(default)]
    pub approved_cascade_target_ids: Vec<Uuid>,
}
