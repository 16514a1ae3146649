//! Review orchestration: the façade callers (HTTP handlers, embedding
//! applications) use to drive intake, classification and cascading.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::cascade::{load_selection, CascadeApplier};
use crate::config::CascadeConfig;
use crate::db::Database;
use crate::error::{CascadeError, CascadeResult};
use crate::impact;
use crate::intake;
use crate::models::*;
use crate::regen::Regenerator;

#[derive(Clone)]
pub struct ReviewService {
    db: Database,
    applier: CascadeApplier,
}

impl ReviewService {
    pub fn new(db: Database, regenerator: Arc<dyn Regenerator>, config: &CascadeConfig) -> Self {
        let applier = CascadeApplier::new(db.clone(), regenerator, config.regen_timeout);
        Self { db, applier }
    }

    // ============================================================
    // Root documents
    // ============================================================

    pub fn create_root(&self, input: CreateRootInput) -> CascadeResult<RootDocument> {
        if input.title.trim().is_empty() {
            return Err(CascadeError::validation("Root document title must not be empty"));
        }
        if let Some((a, b)) = overlapping_paths(&input.fields) {
            return Err(CascadeError::validation(format!(
                "Fields '{}' and '{}' overlap; nest one inside the other instead",
                a, b
            )));
        }
        let root = self.db.create_root(input)?;
        tracing::info!(root_id = %root.id, "Root document created");
        Ok(root)
    }

    pub fn get_root(&self, id: Uuid) -> CascadeResult<RootDocument> {
        self.db
            .get_root(id)?
            .ok_or_else(|| CascadeError::not_found(format!("Root document {}", id)))
    }

    pub fn list_roots(&self) -> CascadeResult<Vec<RootDocument>> {
        Ok(self.db.get_all_roots()?)
    }

    /// Move a root forward through draft → in_review → approved.
    pub fn advance_root_status(&self, id: Uuid, status: RootStatus) -> CascadeResult<RootDocument> {
        let root = self.get_root(id)?;
        if !root.status.can_advance_to(status) {
            return Err(CascadeError::validation(format!(
                "Root status cannot move from {} back to {}",
                root.status.as_str(),
                status.as_str()
            )));
        }
        self.db
            .update_root_status(id, status)?
            .ok_or_else(|| CascadeError::not_found(format!("Root document {}", id)))
    }

    // ============================================================
    // Derived documents
    // ============================================================

    pub fn create_derived(
        &self,
        root_id: Uuid,
        input: CreateDerivedInput,
    ) -> CascadeResult<DerivedDocument> {
        self.get_root(root_id)?;
        if input.inherited_fields.is_empty() {
            return Err(CascadeError::validation(
                "A derived document must inherit at least one field",
            ));
        }
        let doc = self.db.create_derived(root_id, input)?;
        tracing::info!(
            root_id = %root_id,
            derived_id = %doc.id,
            doc_type = doc.doc_type.as_str(),
            "Derived document created"
        );
        Ok(doc)
    }

    pub fn get_derived(&self, id: Uuid) -> CascadeResult<DerivedDocument> {
        self.db
            .get_derived(id)?
            .ok_or_else(|| CascadeError::not_found(format!("Derived document {}", id)))
    }

    pub fn list_derived(&self, root_id: Uuid) -> CascadeResult<Vec<DerivedDocument>> {
        self.get_root(root_id)?;
        Ok(self.db.get_derived_by_root(root_id)?)
    }

    /// Authoring status change, checked against the derived status machine.
    pub async fn set_derived_status(
        &self,
        id: Uuid,
        status: DerivedStatus,
    ) -> CascadeResult<DerivedDocument> {
        self.transition_derived(id, status, None).await
    }

    /// Work resumes on a flagged document: back to in_progress, with its
    /// outstanding fields considered handled.
    pub async fn resume_derived(&self, id: Uuid) -> CascadeResult<DerivedDocument> {
        self.transition_derived(id, DerivedStatus::InProgress, Some(DerivedStatus::NeedsUpdate))
            .await
    }

    /// Completion signal from the regeneration collaborator or an author.
    pub async fn complete_derived(&self, id: Uuid) -> CascadeResult<DerivedDocument> {
        self.transition_derived(id, DerivedStatus::Completed, None).await
    }

    /// Check and write a status change under the document's lock, so it
    /// cannot interleave with a cascade flagging the same document.
    async fn transition_derived(
        &self,
        id: Uuid,
        status: DerivedStatus,
        required: Option<DerivedStatus>,
    ) -> CascadeResult<DerivedDocument> {
        let _guard = self.applier.lock_document(id).await;
        let doc = self.get_derived(id)?;
        if let Some(required) = required {
            if doc.status != required {
                return Err(CascadeError::validation(format!(
                    "Document must be {} for this action (status is {})",
                    required.as_str(),
                    doc.status.as_str()
                )));
            }
        }
        if !doc.status.can_transition_to(status) {
            return Err(CascadeError::validation(format!(
                "Derived document cannot move from {} to {}",
                doc.status.as_str(),
                status.as_str()
            )));
        }
        self.db
            .update_derived_status(id, status)?
            .ok_or_else(|| CascadeError::not_found(format!("Derived document {}", id)))
    }

    /// Admin action replacing a document's inherited fields. Never invoked
    /// by cascades.
    pub async fn set_inherited_fields(
        &self,
        id: Uuid,
        fields: BTreeSet<FieldPath>,
    ) -> CascadeResult<DerivedDocument> {
        if fields.is_empty() {
            return Err(CascadeError::validation(
                "A derived document must inherit at least one field",
            ));
        }
        let _guard = self.applier.lock_document(id).await;
        let doc = self
            .db
            .set_inherited_fields(id, fields)?
            .ok_or_else(|| CascadeError::not_found(format!("Derived document {}", id)))?;
        tracing::info!(derived_id = %id, "Inherited fields replaced");
        Ok(doc)
    }

    pub fn cascade_history(&self, id: Uuid) -> CascadeResult<Vec<CascadeEvent>> {
        self.get_derived(id)?;
        Ok(self.db.get_cascade_history(id)?)
    }

    // ============================================================
    // Review flow
    // ============================================================

    pub fn submit_change(
        &self,
        root_id: Uuid,
        input: SubmitChangeInput,
    ) -> CascadeResult<PendingChange> {
        intake::submit_change(&self.db, root_id, input)
    }

    pub fn list_pending_changes(&self, root_id: Uuid) -> CascadeResult<Vec<PendingChange>> {
        intake::list_pending_changes(&self.db, root_id)
    }

    /// Classify the selected pending changes against the root's derived
    /// documents. Takes no locks and writes nothing, so it is safe to call
    /// repeatedly while a reviewer is still choosing changes.
    pub fn compute_impacts(
        &self,
        root_id: Uuid,
        change_ids: &[Uuid],
    ) -> CascadeResult<Vec<ImpactRecord>> {
        self.get_root(root_id)?;
        let changes = load_selection(&self.db, root_id, change_ids)?;
        if let Some(resolved) = changes.iter().find(|c| !c.is_unresolved()) {
            return Err(CascadeError::validation(format!(
                "Change {} is already {}",
                resolved.id,
                resolved.resolution.as_str()
            )));
        }
        let docs = self.db.get_derived_by_root(root_id)?;
        Ok(impact::compute_impacts(&docs, &changes))
    }

    pub async fn apply_changes(
        &self,
        root_id: Uuid,
        change_ids: &[Uuid],
        approved_cascade_target_ids: &[Uuid],
    ) -> CascadeResult<ApplyResult> {
        self.applier
            .apply_changes(root_id, change_ids, approved_cascade_target_ids)
            .await
    }

    pub async fn reject_changes(&self, root_id: Uuid, change_ids: &[Uuid]) -> CascadeResult<()> {
        self.applier.reject_changes(root_id, change_ids).await
    }
}
