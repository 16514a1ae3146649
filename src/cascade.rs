//! Cascade applier: merges approved changes into a root and propagates them
//! to derived documents.
//!
//! Root mutation is all-or-nothing per call. Propagation to each derived
//! document is independent: a failed or timed-out regeneration flags that
//! document and never rolls back the root or blocks its siblings.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::db::{Database, DerivedUpdate};
use crate::error::{CascadeError, CascadeResult};
use crate::impact;
use crate::locks::KeyedLocks;
use crate::models::*;
use crate::regen::Regenerator;

#[derive(Clone)]
pub struct CascadeApplier {
    db: Database,
    regenerator: Arc<dyn Regenerator>,
    root_locks: KeyedLocks,
    doc_locks: KeyedLocks,
    regen_timeout: Duration,
}

impl CascadeApplier {
    pub fn new(db: Database, regenerator: Arc<dyn Regenerator>, regen_timeout: Duration) -> Self {
        Self {
            db,
            regenerator,
            root_locks: KeyedLocks::new(),
            doc_locks: KeyedLocks::new(),
            regen_timeout,
        }
    }

    /// Exclusive access to a derived document, shared with cascades so
    /// authoring status updates never interleave with a regeneration write.
    pub async fn lock_document(&self, derived_id: Uuid) -> OwnedMutexGuard<()> {
        self.doc_locks.acquire(derived_id).await
    }

    /// Apply a batch of pending changes and cascade to approved targets.
    ///
    /// Holds the root's lock for the whole call so the concurrency check runs
    /// against a stable snapshot. Any validation, lookup or conflict failure
    /// aborts before anything is written.
    pub async fn apply_changes(
        &self,
        root_id: Uuid,
        change_ids: &[Uuid],
        approved_targets: &[Uuid],
    ) -> CascadeResult<ApplyResult> {
        let _root_guard = self.root_locks.acquire(root_id).await;

        let root = self
            .db
            .get_root(root_id)?
            .ok_or_else(|| CascadeError::not_found(format!("Root document {}", root_id)))?;

        if change_ids.is_empty() {
            return Err(CascadeError::validation("No changes selected"));
        }
        let changes = load_selection(&self.db, root_id, change_ids)?;

        for (i, change) in changes.iter().enumerate() {
            if let Some(other) = changes[i + 1..]
                .iter()
                .find(|other| other.field_path.overlaps(&change.field_path))
            {
                return Err(CascadeError::validation(format!(
                    "Selected changes to '{}' and '{}' overlap",
                    change.field_path, other.field_path
                )));
            }
        }

        let conflicts = find_conflicts(&root, &changes);
        if !conflicts.is_empty() {
            tracing::warn!(
                root_id = %root_id,
                conflicts = conflicts.len(),
                "Rejecting change batch with conflicts"
            );
            return Err(CascadeError::Conflict(conflicts));
        }

        // Flagging writes to the root's documents inside the merge, so hold
        // every document lock (in id order) from classification to commit.
        let mut doc_ids: Vec<Uuid> = self
            .db
            .get_derived_by_root(root_id)?
            .iter()
            .map(|d| d.id)
            .collect();
        doc_ids.sort();
        let mut doc_guards = Vec::with_capacity(doc_ids.len());
        for id in &doc_ids {
            doc_guards.push(self.doc_locks.acquire(*id).await);
        }

        let docs: Vec<DerivedDocument> = self
            .db
            .get_derived_by_root(root_id)?
            .into_iter()
            .filter(|d| doc_ids.binary_search(&d.id).is_ok())
            .collect();
        let impacts = impact::compute_impacts(&docs, &changes);

        let targets = self.eligible_targets(&docs, &impacts, approved_targets)?;

        let flags: Vec<DerivedUpdate> = impacts
            .iter()
            .filter(|record| !targets.contains_key(&record.derived_document_id))
            .map(|record| DerivedUpdate {
                derived_id: record.derived_document_id,
                status: DerivedStatus::NeedsUpdate,
                outstanding_fields: record.affected_fields.clone(),
                flag_reason: Some(flag_reason(record)),
                outcome: CascadeOutcome::Flagged,
                triggering_fields: record.affected_fields.clone(),
            })
            .collect();

        let merged = self.db.merge_changes(root_id, root.version, &changes, &flags)?;
        drop(doc_guards);
        tracing::info!(
            root_id = %root_id,
            version = merged.version,
            changes = changes.len(),
            "Merged changes into root document"
        );

        let mut result = ApplyResult {
            applied_change_ids: changes.iter().map(|c| c.id).collect(),
            ..Default::default()
        };
        for flag in flags {
            if let Some(reason) = flag.flag_reason {
                result.flag_reasons.insert(flag.derived_id, reason);
            }
            result.flagged_doc_ids.push(flag.derived_id);
        }

        let outcomes = join_all(
            targets
                .values()
                .map(|record| self.cascade_one(root_id, record)),
        )
        .await;

        for (doc_id, outcome) in targets.keys().zip(outcomes) {
            match outcome {
                Ok(()) => result.cascaded_doc_ids.push(*doc_id),
                Err(reason) => {
                    result.flagged_doc_ids.push(*doc_id);
                    result.flag_reasons.insert(*doc_id, reason);
                }
            }
        }

        result.cascaded_doc_ids.sort();
        result.flagged_doc_ids.sort();

        tracing::info!(
            root_id = %root_id,
            cascaded = result.cascaded_doc_ids.len(),
            flagged = result.flagged_doc_ids.len(),
            "Cascade finished"
        );

        Ok(result)
    }

    /// Reject pending changes without touching the root or any derived
    /// document. Changes already rejected are skipped so retries are safe.
    pub async fn reject_changes(&self, root_id: Uuid, change_ids: &[Uuid]) -> CascadeResult<()> {
        let _root_guard = self.root_locks.acquire(root_id).await;

        let root = self
            .db
            .get_root(root_id)?
            .ok_or_else(|| CascadeError::not_found(format!("Root document {}", root_id)))?;

        if change_ids.is_empty() {
            return Err(CascadeError::validation("No changes selected"));
        }
        let changes = load_selection(&self.db, root_id, change_ids)?;

        let accepted: Vec<ChangeConflict> = changes
            .iter()
            .filter(|c| c.resolution == Resolution::Accepted)
            .map(|c| ChangeConflict {
                change_id: c.id,
                field_path: c.field_path.clone(),
                reason: ConflictReason::AlreadyAccepted,
                expected: c.old_value.clone(),
                actual: root.value_at(&c.field_path),
            })
            .collect();
        if !accepted.is_empty() {
            return Err(CascadeError::Conflict(accepted));
        }

        let rejected = self.db.reject_changes(root_id, change_ids)?;
        tracing::info!(
            root_id = %root_id,
            rejected = rejected.len(),
            "Rejected pending changes"
        );
        Ok(())
    }

    /// Resolve approved target ids to their impact records.
    ///
    /// Only documents that were impacted and do not require review may be
    /// cascaded automatically.
    fn eligible_targets<'a>(
        &self,
        docs: &[DerivedDocument],
        impacts: &'a [ImpactRecord],
        approved_targets: &[Uuid],
    ) -> CascadeResult<BTreeMap<Uuid, &'a ImpactRecord>> {
        let mut targets = BTreeMap::new();

        for id in approved_targets {
            if !docs.iter().any(|d| d.id == *id) {
                return Err(CascadeError::not_found(format!(
                    "Derived document {} on this root",
                    id
                )));
            }

            let record = impacts
                .iter()
                .find(|r| r.derived_document_id == *id)
                .ok_or_else(|| {
                    CascadeError::validation(format!(
                        "Derived document {} is not affected by the selected changes",
                        id
                    ))
                })?;

            if record.requires_review {
                return Err(CascadeError::validation(format!(
                    "Derived document {} requires review and cannot be cascaded automatically",
                    id
                )));
            }

            targets.insert(*id, record);
        }

        Ok(targets)
    }

    /// Ask for one document to be regenerated and record the outcome.
    /// Returns the flag reason on failure.
    async fn cascade_one(&self, root_id: Uuid, record: &ImpactRecord) -> Result<(), String> {
        let doc_id = record.derived_document_id;
        let _doc_guard = self.doc_locks.acquire(doc_id).await;

        let fields: Vec<FieldPath> = record.affected_fields.iter().cloned().collect();
        let failure = match tokio::time::timeout(
            self.regen_timeout,
            self.regenerator.regenerate(doc_id, &fields),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("Regeneration failed: {}", e)),
            Err(_) => Some(format!(
                "Regeneration timed out after {}ms",
                self.regen_timeout.as_millis()
            )),
        };

        let update = match &failure {
            None => DerivedUpdate {
                derived_id: doc_id,
                status: DerivedStatus::InProgress,
                outstanding_fields: BTreeSet::new(),
                flag_reason: None,
                outcome: CascadeOutcome::Regenerating,
                triggering_fields: record.affected_fields.clone(),
            },
            Some(reason) => DerivedUpdate {
                derived_id: doc_id,
                status: DerivedStatus::NeedsUpdate,
                outstanding_fields: record.affected_fields.clone(),
                flag_reason: Some(reason.clone()),
                outcome: CascadeOutcome::Failed,
                triggering_fields: record.affected_fields.clone(),
            },
        };

        if let Err(e) = self.db.record_cascade(root_id, &update) {
            tracing::error!(derived_id = %doc_id, "Failed to record cascade outcome: {}", e);
            return Err(failure.unwrap_or_else(|| format!("Failed to record cascade outcome: {}", e)));
        }

        match failure {
            None => {
                tracing::debug!(derived_id = %doc_id, "Regeneration requested");
                Ok(())
            }
            Some(reason) => {
                tracing::warn!(derived_id = %doc_id, "Cascade flagged: {}", reason);
                Err(reason)
            }
        }
    }
}

/// Load the selected changes of a root, in selection order.
///
/// Duplicate ids are a validation error; ids that do not exist or belong to
/// another root are not found.
pub(crate) fn load_selection(
    db: &Database,
    root_id: Uuid,
    change_ids: &[Uuid],
) -> CascadeResult<Vec<PendingChange>> {
    let mut seen = HashSet::new();
    let mut changes = Vec::with_capacity(change_ids.len());

    for id in change_ids {
        if !seen.insert(*id) {
            return Err(CascadeError::validation(format!(
                "Change {} selected more than once",
                id
            )));
        }
        let change = db
            .get_change(*id)?
            .filter(|c| c.root_id == root_id)
            .ok_or_else(|| CascadeError::not_found(format!("Change {} on root {}", id, root_id)))?;
        changes.push(change);
    }

    Ok(changes)
}

fn find_conflicts(root: &RootDocument, changes: &[PendingChange]) -> Vec<ChangeConflict> {
    changes
        .iter()
        .filter_map(|change| {
            let actual = root.value_at(&change.field_path);
            let reason = match change.resolution {
                Resolution::Accepted => ConflictReason::AlreadyAccepted,
                Resolution::Rejected => ConflictReason::AlreadyRejected,
                Resolution::Unresolved if change.old_value != actual => ConflictReason::StaleValue,
                Resolution::Unresolved => return None,
            };
            Some(ChangeConflict {
                change_id: change.id,
                field_path: change.field_path.clone(),
                reason,
                expected: change.old_value.clone(),
                actual,
            })
        })
        .collect()
}

fn flag_reason(record: &ImpactRecord) -> String {
    let fields = record
        .affected_fields
        .iter()
        .map(FieldPath::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if record.requires_review {
        format!("Requires review of changed fields: {}", fields)
    } else {
        format!("Not approved for automatic update: {}", fields)
    }
}
