use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::FieldPath;

/// A sub-deliverable whose content is partly defined by fields of its root.
///
/// `inherited_fields` declares which root fields the document depends on and
/// is only replaced by an explicit admin action, never by a cascade.
/// `outstanding_fields` holds affected fields that were flagged but not yet
/// propagated; they resurface on every classification pass until the
/// document is regenerated or work on it resumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedDocument {
    pub id: Uuid,
    pub root_id: Uuid,
    pub title: String,
    pub doc_type: DocumentType,
    pub status: DerivedStatus,
    pub inherited_fields: BTreeSet<FieldPath>,
    pub outstanding_fields: BTreeSet<FieldPath>,
    /// Why the document was last flagged for manual attention, if it was.
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of deliverable a derived document represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Presentation,
    SocialMedia,
    FinancialModel,
    Marketing,
    Operations,
    Generic,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Presentation => "presentation",
            Self::SocialMedia => "social_media",
            Self::FinancialModel => "financial_model",
            Self::Marketing => "marketing",
            Self::Operations => "operations",
            Self::Generic => "generic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "presentation" => Some(Self::Presentation),
            "social_media" => Some(Self::SocialMedia),
            "financial_model" => Some(Self::FinancialModel),
            "marketing" => Some(Self::Marketing),
            "operations" => Some(Self::Operations),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

/// Authoring status of a derived document.
///
/// - `NotStarted` → `InProgress` → `Completed`
/// - `InProgress` | `Completed` → `NeedsUpdate` when a root change affects it
/// - `NeedsUpdate` → `InProgress` when work resumes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    NotStarted,
    InProgress,
    Completed,
    NeedsUpdate,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::NeedsUpdate => "needs_update",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "needs_update" => Some(Self::NeedsUpdate),
            _ => None,
        }
    }

    /// Transitions allowed through authoring. Cascades bypass this check.
    pub fn can_transition_to(&self, next: DerivedStatus) -> bool {
        use DerivedStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (InProgress, Completed)
                | (InProgress, NeedsUpdate)
                | (Completed, NeedsUpdate)
                | (NeedsUpdate, InProgress)
        ) || *self == next
    }
}

/// Input for creating a derived document under a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDerivedInput {
    pub title: String,
    pub doc_type: DocumentType,
    pub inherited_fields: BTreeSet<FieldPath>,
}

/// Input for an authoring status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDerivedStatusInput {
    pub status: DerivedStatus,
}

/// Input for the admin action that replaces a document's inherited fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetInheritedFieldsInput {
    pub inherited_fields: BTreeSet<FieldPath>,
}
