mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::models::*;

const ROOT_COLUMNS: &str = "id, title, status, fields, version, created_at, updated_at";
const DERIVED_COLUMNS: &str = "id, root_id, title, doc_type, status, inherited_fields, outstanding_fields, flag_reason, created_at, updated_at";
const CHANGE_COLUMNS: &str = "id, root_id, field_path, old_value, new_value, proposed_by, resolution, created_at, resolved_at";

/// A derived document state change recorded together with a cascade event.
#[derive(Debug, Clone)]
pub struct DerivedUpdate {
    pub derived_id: Uuid,
    pub status: DerivedStatus,
    pub outstanding_fields: BTreeSet<FieldPath>,
    pub flag_reason: Option<String>,
    pub outcome: CascadeOutcome,
    pub triggering_fields: BTreeSet<FieldPath>,
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "plan-cascade")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("plan-cascade.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ============================================================
    // Root document operations
    // ============================================================

    pub fn get_all_roots(&self) -> Result<Vec<RootDocument>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROOT_COLUMNS} FROM root_documents ORDER BY title, created_at"
        ))?;

        let roots = stmt
            .query_map([], row_to_root)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(roots)
    }

    pub fn get_root(&self, id: Uuid) -> Result<Option<RootDocument>> {
        let conn = self.lock();
        query_root(&conn, id)
    }

    pub fn create_root(&self, input: CreateRootInput) -> Result<RootDocument> {
        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO root_documents (id, title, status, fields, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            (
                id.to_string(),
                &input.title,
                RootStatus::Draft.as_str(),
                serde_json::to_string(&input.fields)?,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(RootDocument {
            id,
            title: input.title,
            status: RootStatus::Draft,
            fields: input.fields,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_root_status(&self, id: Uuid, status: RootStatus) -> Result<Option<RootDocument>> {
        let conn = self.lock();
        let Some(existing) = query_root(&conn, id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        conn.execute(
            "UPDATE root_documents SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), now.to_rfc3339(), id.to_string()),
        )?;

        Ok(Some(RootDocument {
            status,
            updated_at: now,
            ..existing
        }))
    }

    // ============================================================
    // Derived document operations
    // ============================================================

    pub fn get_derived(&self, id: Uuid) -> Result<Option<DerivedDocument>> {
        let conn = self.lock();
        query_derived(&conn, id)
    }

    pub fn get_derived_by_root(&self, root_id: Uuid) -> Result<Vec<DerivedDocument>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DERIVED_COLUMNS} FROM derived_documents WHERE root_id = ? ORDER BY title, created_at"
        ))?;

        let docs = stmt
            .query_map([root_id.to_string()], row_to_derived)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    pub fn create_derived(&self, root_id: Uuid, input: CreateDerivedInput) -> Result<DerivedDocument> {
        self.get_root(root_id)?
            .ok_or_else(|| anyhow::anyhow!("Root document not found"))?;

        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO derived_documents (id, root_id, title, doc_type, status, inherited_fields, outstanding_fields, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?)",
            (
                id.to_string(),
                root_id.to_string(),
                &input.title,
                input.doc_type.as_str(),
                DerivedStatus::NotStarted.as_str(),
                serde_json::to_string(&input.inherited_fields)?,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(DerivedDocument {
            id,
            root_id,
            title: input.title,
            doc_type: input.doc_type,
            status: DerivedStatus::NotStarted,
            inherited_fields: input.inherited_fields,
            outstanding_fields: BTreeSet::new(),
            flag_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Write a derived document's status. Moving to `InProgress` clears the
    /// outstanding fields and flag reason since the author has taken them on.
    pub fn update_derived_status(
        &self,
        id: Uuid,
        status: DerivedStatus,
    ) -> Result<Option<DerivedDocument>> {
        let conn = self.lock();
        let Some(existing) = query_derived(&conn, id)? else {
            return Ok(None);
        };

        let (outstanding, flag_reason) = if status == DerivedStatus::InProgress {
            (BTreeSet::new(), None)
        } else {
            (existing.outstanding_fields.clone(), existing.flag_reason.clone())
        };

        let now = Utc::now();
        conn.execute(
            "UPDATE derived_documents SET status = ?, outstanding_fields = ?, flag_reason = ?, updated_at = ? WHERE id = ?",
            (
                status.as_str(),
                serde_json::to_string(&outstanding)?,
                &flag_reason,
                now.to_rfc3339(),
                id.to_string(),
            ),
        )?;

        Ok(Some(DerivedDocument {
            status,
            outstanding_fields: outstanding,
            flag_reason,
            updated_at: now,
            ..existing
        }))
    }

    pub fn set_inherited_fields(
        &self,
        id: Uuid,
        fields: BTreeSet<FieldPath>,
    ) -> Result<Option<DerivedDocument>> {
        let conn = self.lock();
        let Some(existing) = query_derived(&conn, id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        conn.execute(
            "UPDATE derived_documents SET inherited_fields = ?, updated_at = ? WHERE id = ?",
            (
                serde_json::to_string(&fields)?,
                now.to_rfc3339(),
                id.to_string(),
            ),
        )?;

        Ok(Some(DerivedDocument {
            inherited_fields: fields,
            updated_at: now,
            ..existing
        }))
    }

    // ============================================================
    // Pending change operations
    // ============================================================

    /// Insert a pending change. Returns false, writing nothing, when a change
    /// with the same id is already stored.
    pub fn insert_change(&self, change: &PendingChange) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute(
            "INSERT INTO pending_changes (id, root_id, field_path, old_value, new_value, proposed_by, resolution, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
            (
                change.id.to_string(),
                change.root_id.to_string(),
                change.field_path.as_str(),
                serde_json::to_string(&change.old_value)?,
                serde_json::to_string(&change.new_value)?,
                change.proposed_by.as_str(),
                change.resolution.as_str(),
                change.created_at.to_rfc3339(),
            ),
        )?;
        Ok(rows == 1)
    }

    pub fn get_change(&self, id: Uuid) -> Result<Option<PendingChange>> {
        let conn = self.lock();
        let change = conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM pending_changes WHERE id = ?"),
                [id.to_string()],
                row_to_change,
            )
            .optional()?;
        Ok(change)
    }

    /// Unresolved changes for a root, oldest first.
    pub fn get_pending_changes(&self, root_id: Uuid) -> Result<Vec<PendingChange>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM pending_changes
             WHERE root_id = ? AND resolution = 'unresolved' ORDER BY created_at, id"
        ))?;

        let changes = stmt
            .query_map([root_id.to_string()], row_to_change)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(changes)
    }

    /// Merge accepted changes into the root and flag derived documents in a
    /// single transaction.
    ///
    /// Fails without writing anything if the root moved past
    /// `expected_version` or any change is no longer unresolved.
    pub fn merge_changes(
        &self,
        root_id: Uuid,
        expected_version: i64,
        changes: &[PendingChange],
        flags: &[DerivedUpdate],
    ) -> Result<RootDocument> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let mut root = query_root(&tx, root_id)?
            .ok_or_else(|| anyhow::anyhow!("Root document not found"))?;

        if root.version != expected_version {
            anyhow::bail!(
                "Root document version moved from {} to {}",
                expected_version,
                root.version
            );
        }

        for change in changes {
            root.set_value(&change.field_path, change.new_value.clone());

            let rows = tx.execute(
                "UPDATE pending_changes SET resolution = 'accepted', resolved_at = ?
                 WHERE id = ? AND root_id = ? AND resolution = 'unresolved'",
                (
                    now.to_rfc3339(),
                    change.id.to_string(),
                    root_id.to_string(),
                ),
            )?;
            if rows != 1 {
                anyhow::bail!("Change {} is no longer unresolved", change.id);
            }
        }

        let version = root.version + 1;
        tx.execute(
            "UPDATE root_documents SET fields = ?, version = ?, updated_at = ? WHERE id = ?",
            (
                serde_json::to_string(&root.fields)?,
                version,
                now.to_rfc3339(),
                root_id.to_string(),
            ),
        )?;

        for flag in flags {
            write_derived_update(&tx, root_id, flag)?;
        }

        tx.commit()?;

        Ok(RootDocument {
            version,
            updated_at: now,
            ..root
        })
    }

    /// Mark unresolved changes as rejected. Returns the ids that changed.
    pub fn reject_changes(&self, root_id: Uuid, change_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut rejected = Vec::new();

        for id in change_ids {
            let rows = tx.execute(
                "UPDATE pending_changes SET resolution = 'rejected', resolved_at = ?
                 WHERE id = ? AND root_id = ? AND resolution = 'unresolved'",
                (now.to_rfc3339(), id.to_string(), root_id.to_string()),
            )?;
            if rows == 1 {
                rejected.push(*id);
            }
        }

        tx.commit()?;
        Ok(rejected)
    }

    // ============================================================
    // Cascade operations
    // ============================================================

    /// Record the outcome of one derived document's cascade.
    pub fn record_cascade(&self, root_id: Uuid, update: &DerivedUpdate) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        write_derived_update(&tx, root_id, update)?;
        tx.commit()?;
        Ok(())
    }

    /// Cascade events for a derived document, newest first.
    pub fn get_cascade_history(&self, derived_id: Uuid) -> Result<Vec<CascadeEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, derived_document_id, root_id, outcome, triggering_fields, reason, created_at
             FROM cascade_events WHERE derived_document_id = ? ORDER BY created_at DESC, rowid DESC",
        )?;

        let events = stmt
            .query_map([derived_id.to_string()], |row| {
                Ok(CascadeEvent {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    derived_document_id: parse_uuid(row.get::<_, String>(1)?),
                    root_id: parse_uuid(row.get::<_, String>(2)?),
                    outcome: CascadeOutcome::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(CascadeOutcome::Flagged),
                    triggering_fields: parse_json(row.get::<_, String>(4)?),
                    reason: row.get(5)?,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn write_derived_update(conn: &Connection, root_id: Uuid, update: &DerivedUpdate) -> Result<()> {
    let now = Utc::now();
    let rows = conn.execute(
        "UPDATE derived_documents SET status = ?, outstanding_fields = ?, flag_reason = ?, updated_at = ?
         WHERE id = ? AND root_id = ?",
        (
            update.status.as_str(),
            serde_json::to_string(&update.outstanding_fields)?,
            &update.flag_reason,
            now.to_rfc3339(),
            update.derived_id.to_string(),
            root_id.to_string(),
        ),
    )?;
    if rows != 1 {
        anyhow::bail!("Derived document {} not found", update.derived_id);
    }

    conn.execute(
        "INSERT INTO cascade_events (id, derived_document_id, root_id, outcome, triggering_fields, reason, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            update.derived_id.to_string(),
            root_id.to_string(),
            update.outcome.as_str(),
            serde_json::to_string(&update.triggering_fields)?,
            &update.flag_reason,
            now.to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn query_root(conn: &Connection, id: Uuid) -> Result<Option<RootDocument>> {
    let root = conn
        .query_row(
            &format!("SELECT {ROOT_COLUMNS} FROM root_documents WHERE id = ?"),
            [id.to_string()],
            row_to_root,
        )
        .optional()?;
    Ok(root)
}

fn query_derived(conn: &Connection, id: Uuid) -> Result<Option<DerivedDocument>> {
    let doc = conn
        .query_row(
            &format!("SELECT {DERIVED_COLUMNS} FROM derived_documents WHERE id = ?"),
            [id.to_string()],
            row_to_derived,
        )
        .optional()?;
    Ok(doc)
}

fn row_to_root(row: &Row<'_>) -> rusqlite::Result<RootDocument> {
    Ok(RootDocument {
        id: parse_uuid(row.get::<_, String>(0)?),
        title: row.get(1)?,
        status: RootStatus::from_str(&row.get::<_, String>(2)?).unwrap_or(RootStatus::Draft),
        fields: decode_json::<BTreeMap<FieldPath, Value>>(3, row.get::<_, String>(3)?)?,
        version: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn row_to_derived(row: &Row<'_>) -> rusqlite::Result<DerivedDocument> {
    let doc_type: String = row.get(3)?;
    let doc_type = DocumentType::from_str(&doc_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown document type '{}'", doc_type).into(),
        )
    })?;

    Ok(DerivedDocument {
        id: parse_uuid(row.get::<_, String>(0)?),
        root_id: parse_uuid(row.get::<_, String>(1)?),
        title: row.get(2)?,
        doc_type,
        status: DerivedStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(DerivedStatus::NeedsUpdate),
        inherited_fields: decode_json(5, row.get::<_, String>(5)?)?,
        outstanding_fields: decode_json(6, row.get::<_, String>(6)?)?,
        flag_reason: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<PendingChange> {
    let field_path: String = row.get(2)?;
    let field_path = FieldPath::parse(&field_path).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(PendingChange {
        id: parse_uuid(row.get::<_, String>(0)?),
        root_id: parse_uuid(row.get::<_, String>(1)?),
        field_path,
        old_value: decode_json(3, row.get::<_, String>(3)?)?,
        new_value: decode_json(4, row.get::<_, String>(4)?)?,
        proposed_by: Provenance::from_str(&row.get::<_, String>(5)?).unwrap_or(Provenance::System),
        resolution: Resolution::from_str(&row.get::<_, String>(6)?)
            .unwrap_or(Resolution::Unresolved),
        created_at: parse_datetime(row.get::<_, String>(7)?),
        resolved_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Decode a JSON column that is written back on update. A corrupt value is
/// an error rather than a default, so it is never persisted over the data.
fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, s: String) -> rusqlite::Result<T> {
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(s: String) -> T {
    serde_json::from_str(&s).unwrap_or_default()
}
