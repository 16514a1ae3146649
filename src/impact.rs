//! Impact classification.
//!
//! Given a root's derived documents and a selection of its pending changes,
//! decide which documents are affected, how severely, and whether they may
//! be regenerated automatically or need a human reviewer. Everything here is
//! a pure function of its arguments, so callers can classify speculatively
//! (live previews while a reviewer is still picking changes) without locks.

use std::collections::BTreeSet;

use crate::models::{
    DerivedDocument, DocumentType, FieldPath, ImpactRecord, PendingChange, Provenance, Severity,
};

const HIGH_SEVERITY_FIELDS: &[&str] = &["valueProposition", "objectives", "targetAudience", "strategy"];
const MEDIUM_SEVERITY_FIELDS: &[&str] = &["businessInfo", "revenueModel", "keywords"];

/// Cosmetic fields a derived document can pick up without review.
const AUTO_UPDATEABLE_FIELDS: &[&str] = &["companyName", "industry", "description", "tagline", "website"];

/// True if a change at `change_path` touches the inherited field `inherited`:
/// the paths are equal or the change lies structurally beneath it.
pub fn field_matches(change_path: &FieldPath, inherited: &FieldPath) -> bool {
    change_path.is_within(inherited)
}

/// Base severity of a single field, looked up by its first path segment.
pub fn field_severity(field: &FieldPath) -> Severity {
    let head = field.head();
    if HIGH_SEVERITY_FIELDS.contains(&head) {
        Severity::High
    } else if MEDIUM_SEVERITY_FIELDS.contains(&head) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

pub fn field_auto_updateable(field: &FieldPath) -> bool {
    AUTO_UPDATEABLE_FIELDS.contains(&field.head())
}

/// High-severity fields always need a reviewer, whatever the document type.
fn is_strategic(field: &FieldPath) -> bool {
    field_severity(field) == Severity::High
}

fn touches_revenue(field: &FieldPath) -> bool {
    field.as_str().to_ascii_lowercase().contains("revenue")
}

/// Classify one derived document against the selected changes.
///
/// Returns `None` when no inherited field is touched and the document has
/// no outstanding fields left over from an earlier flag.
pub fn classify(doc: &DerivedDocument, changes: &[PendingChange]) -> Option<ImpactRecord> {
    let mut affected: BTreeSet<FieldPath> = doc.outstanding_fields.clone();
    let mut system_authored = false;

    for inherited in &doc.inherited_fields {
        for change in changes {
            if field_matches(&change.field_path, inherited) {
                affected.insert(inherited.clone());
                system_authored |= change.proposed_by == Provenance::System;
            }
        }
    }

    if affected.is_empty() {
        return None;
    }

    let severity = affected
        .iter()
        .map(field_severity)
        .max()
        .unwrap_or(Severity::Low);

    let financial = doc.doc_type == DocumentType::FinancialModel;
    let requires_review = affected.iter().any(is_strategic)
        || (financial && affected.iter().any(touches_revenue))
        || (financial && system_authored);

    let auto_updateable = !requires_review && affected.iter().all(field_auto_updateable);

    Some(ImpactRecord {
        derived_document_id: doc.id,
        affected_fields: affected,
        severity,
        auto_updateable,
        requires_review,
    })
}

/// Classify every derived document of a root.
///
/// Output holds at most one record per document and is sorted by document
/// id, so identical inputs always yield identical output regardless of the
/// order documents or changes were supplied in.
pub fn compute_impacts(docs: &[DerivedDocument], changes: &[PendingChange]) -> Vec<ImpactRecord> {
    let mut records: Vec<ImpactRecord> = docs
        .iter()
        .filter_map(|doc| classify(doc, changes))
        .collect();
    records.sort_by_key(|r| r.derived_document_id);
    records.dedup_by_key(|r| r.derived_document_id);
    records
}

/// Presentation order for reviewers: most severe first, review-required
/// before automatic, then by document id.
pub fn sort_for_review(records: &mut [ImpactRecord]) {
    records.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.requires_review.cmp(&a.requires_review))
            .then(a.derived_document_id.cmp(&b.derived_document_id))
    });
}
