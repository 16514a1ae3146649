use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::field::FieldPath;

/// The hub planning record that derived documents inherit fields from.
///
/// Root fields are never written directly. They change only when a batch of
/// pending changes is accepted, and every accepted batch bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootDocument {
    pub id: Uuid,
    pub title: String,
    pub status: RootStatus,
    pub fields: BTreeMap<FieldPath, Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RootDocument {
    /// The current value at `path`, or `null` when the field is not set yet.
    ///
    /// Paths resolve structurally: `objectives.primary` is read from inside
    /// an `objectives` object, and `objectives` assembles any entries stored
    /// beneath it.
    pub fn value_at(&self, path: &FieldPath) -> Value {
        if let Some(value) = self.fields.get(path) {
            return value.clone();
        }

        if let Some((key, value)) = self.fields.iter().find(|(key, _)| path.is_within(key)) {
            let mut current = value;
            for segment in path.segments().skip(key.depth()) {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => return Value::Null,
                }
            }
            return current.clone();
        }

        let mut assembled = Value::Null;
        for (key, value) in self.fields.iter().filter(|(key, _)| key.is_within(path)) {
            insert_at(&mut assembled, key.segments().skip(path.depth()), value.clone());
        }
        assembled
    }

    /// Write `value` at `path`, keeping at most one entry per subtree.
    ///
    /// A stored ancestor is updated in place; otherwise the entry for `path`
    /// replaces the path and any entries stored beneath it.
    pub fn set_value(&mut self, path: &FieldPath, value: Value) {
        let ancestor = self
            .fields
            .keys()
            .find(|key| path.is_within(key) && *key != path)
            .cloned();

        if let Some(key) = ancestor {
            if let Some(slot) = self.fields.get_mut(&key) {
                insert_at(slot, path.segments().skip(key.depth()), value);
            }
            return;
        }

        self.fields.retain(|key, _| !key.is_within(path));
        self.fields.insert(path.clone(), value);
    }
}

/// First pair of keys where one lies within the other, if any.
pub fn overlapping_paths(fields: &BTreeMap<FieldPath, Value>) -> Option<(&FieldPath, &FieldPath)> {
    let keys: Vec<&FieldPath> = fields.keys().collect();
    keys.iter().enumerate().find_map(|(i, a)| {
        keys[i + 1..]
            .iter()
            .find(|b| a.overlaps(b))
            .map(|b| (*a, *b))
    })
}

/// Write `value` at the nested location named by `segments`, turning any
/// non-object on the way into an object.
fn insert_at<'a>(target: &mut Value, mut segments: impl Iterator<Item = &'a str>, value: Value) {
    let Some(segment) = segments.next() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let slot = map.entry(segment.to_string()).or_insert(Value::Null);
        insert_at(slot, segments, value);
    }
}

/// Review status of a root document.
///
/// Advances monotonically: `Draft` → `InReview` → `Approved`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RootStatus {
    Draft,
    InReview,
    Approved,
}

impl RootStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in_review",
            Self::Approved => "approved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    /// Staying in place is allowed so status updates are safe to retry.
    pub fn can_advance_to(&self, next: RootStatus) -> bool {
        next >= *self
    }
}

/// Input for creating a root document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRootInput {
    pub title: String,
    /// Initial field values. Later edits must go through pending changes.
    #[serde(default)]
    pub fields: BTreeMap<FieldPath, Value>,
}

/// Input for advancing a root document's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRootStatusInput {
    pub status: RootStatus,
}
