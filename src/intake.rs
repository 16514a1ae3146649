//! Change intake: records proposed root edits as immutable pending changes.

use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{CascadeError, CascadeResult};
use crate::models::{PendingChange, Resolution, SubmitChangeInput};

/// Record a proposed edit, snapshotting the root's current value at the
/// field as the change's `old_value`.
///
/// Submissions do not take the root lock. A proposal racing an apply simply
/// snapshots whichever value it reads and, if that value is stale by the
/// time it is applied, fails the concurrency check then.
pub fn submit_change(
    db: &Database,
    root_id: Uuid,
    input: SubmitChangeInput,
) -> CascadeResult<PendingChange> {
    let root = db
        .get_root(root_id)?
        .ok_or_else(|| CascadeError::not_found(format!("Root document {}", root_id)))?;

    if let Some(id) = input.id {
        if let Some(existing) = db.get_change(id)? {
            return replay(existing, root_id, &input);
        }
    }

    let change = PendingChange {
        id: input.id.unwrap_or_else(Uuid::new_v4),
        root_id,
        old_value: root.value_at(&input.field_path),
        field_path: input.field_path,
        new_value: input.new_value,
        proposed_by: input.proposed_by,
        resolution: Resolution::Unresolved,
        created_at: Utc::now(),
        resolved_at: None,
    };
    if !db.insert_change(&change)? {
        // A concurrent submission with the same id won the insert.
        let existing = db
            .get_change(change.id)?
            .ok_or_else(|| CascadeError::not_found(format!("Change {}", change.id)))?;
        return replay(
            existing,
            root_id,
            &SubmitChangeInput {
                id: Some(change.id),
                field_path: change.field_path,
                new_value: change.new_value,
                proposed_by: change.proposed_by,
            },
        );
    }

    tracing::info!(
        root_id = %root_id,
        change_id = %change.id,
        field = %change.field_path,
        proposed_by = change.proposed_by.as_str(),
        "Pending change submitted"
    );

    Ok(change)
}

/// Resolve a resubmission of an already stored change id.
fn replay(
    existing: PendingChange,
    root_id: Uuid,
    input: &SubmitChangeInput,
) -> CascadeResult<PendingChange> {
    let same = existing.root_id == root_id
        && existing.field_path == input.field_path
        && existing.new_value == input.new_value
        && existing.proposed_by == input.proposed_by;
    if same {
        tracing::debug!("Change {} already submitted, returning stored copy", existing.id);
        return Ok(existing);
    }
    Err(CascadeError::validation(format!(
        "Change id {} is already used by a different change",
        existing.id
    )))
}

/// All unresolved changes on a root, oldest first.
pub fn list_pending_changes(db: &Database, root_id: Uuid) -> CascadeResult<Vec<PendingChange>> {
    db.get_root(root_id)?
        .ok_or_else(|| CascadeError::not_found(format!("Root document {}", root_id)))?;
    Ok(db.get_pending_changes(root_id)?)
}
