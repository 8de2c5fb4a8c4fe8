//! Licensing workflow persistence.
//!
//! The workflow document is stored as JSON in `body`; `status` and the party
//! ids are duplicated into columns for lookup.

use quill_types::{AgreementId, UserId, WorkflowId};
use rusqlite::{Connection, OptionalExtension};

use crate::{from_sql_u64, parse_uuid, to_sql_u64, DbError, Result};

/// A stored workflow document.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowRow {
    pub workflow_id: WorkflowId,
    pub agreement_id: AgreementId,
    pub studio_id: UserId,
    pub writer_id: UserId,
    pub status: String,
    pub body: serde_json::Value,
    pub created_at: u64,
    pub updated_at: u64,
}

pub fn insert(conn: &Connection, row: &WorkflowRow) -> Result<()> {
    conn.execute(
        "INSERT INTO licensing_workflows
         (workflow_id, agreement_id, studio_id, writer_id, status, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            row.workflow_id.to_string(),
            row.agreement_id.to_string(),
            row.studio_id.to_string(),
            row.writer_id.to_string(),
            row.status,
            serde_json::to_string(&row.body)?,
            to_sql_u64(row.created_at),
            to_sql_u64(row.updated_at),
        ],
    )?;
    Ok(())
}

/// Replace the document and status of an existing workflow.
pub fn update(
    conn: &Connection,
    workflow_id: &WorkflowId,
    status: &str,
    body: &serde_json::Value,
    now: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE licensing_workflows SET status = ?1, body = ?2, updated_at = ?3
         WHERE workflow_id = ?4",
        rusqlite::params![
            status,
            serde_json::to_string(body)?,
            to_sql_u64(now),
            workflow_id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("workflow {workflow_id}")));
    }
    Ok(())
}

pub fn get(conn: &Connection, workflow_id: &WorkflowId) -> Result<Option<WorkflowRow>> {
    query_one(conn, "workflow_id = ?1", &workflow_id.to_string())
}

pub fn get_by_agreement(conn: &Connection, agreement_id: &AgreementId) -> Result<Option<WorkflowRow>> {
    query_one(conn, "agreement_id = ?1", &agreement_id.to_string())
}

/// Workflows in which `party` is the writer or the studio, newest first.
pub fn list_for_party(conn: &Connection, party: &UserId) -> Result<Vec<WorkflowRow>> {
    let mut stmt = conn.prepare(
        "SELECT workflow_id, agreement_id, studio_id, writer_id, status, body, created_at, updated_at
         FROM licensing_workflows WHERE writer_id = ?1 OR studio_id = ?1
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let raws = stmt
        .query_map([party.to_string()], raw_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(into_row).collect()
}

type RawRow = (String, String, String, String, String, String, i64, i64);

fn query_one(conn: &Connection, predicate: &str, value: &str) -> Result<Option<WorkflowRow>> {
    let sql = format!(
        "SELECT workflow_id, agreement_id, studio_id, writer_id, status, body, created_at, updated_at
         FROM licensing_workflows WHERE {predicate}"
    );
    let raw = conn.query_row(&sql, [value], raw_from_row).optional()?;
    raw.map(into_row).transpose()
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_row(raw: RawRow) -> Result<WorkflowRow> {
    let (workflow_id, agreement_id, studio_id, writer_id, status, body, created_at, updated_at) =
        raw;
    Ok(WorkflowRow {
        workflow_id: parse_uuid(&workflow_id)?,
        agreement_id: parse_uuid(&agreement_id)?,
        studio_id: parse_uuid(&studio_id)?,
        writer_id: parse_uuid(&writer_id)?,
        status,
        body: serde_json::from_str(&body)?,
        created_at: from_sql_u64(created_at),
        updated_at: from_sql_u64(updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn row() -> WorkflowRow {
        WorkflowRow {
            workflow_id: Uuid::new_v4(),
            agreement_id: Uuid::new_v4(),
            studio_id: Uuid::new_v4(),
            writer_id: Uuid::new_v4(),
            status: "draft".into(),
            body: serde_json::json!({ "steps": [] }),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_insert_update_get() {
        let conn = crate::open_memory().expect("open");
        let wf = row();
        insert(&conn, &wf).expect("insert");

        let body = serde_json::json!({ "steps": [{ "name": "negotiation" }] });
        update(&conn, &wf.workflow_id, "active", &body, 5).expect("update");

        let stored = get_by_agreement(&conn, &wf.agreement_id)
            .expect("get")
            .expect("row");
        assert_eq!(stored.status, "active");
        assert_eq!(stored.body, body);
        assert_eq!(stored.updated_at, 5);
        assert_eq!(list_for_party(&conn, &wf.studio_id).expect("list").len(), 1);
    }

    #[test]
    fn test_one_workflow_per_agreement() {
        let conn = crate::open_memory().expect("open");
        let first = row();
        insert(&conn, &first).expect("insert");
        let mut second = row();
        second.agreement_id = first.agreement_id;
        assert!(insert(&conn, &second).expect_err("dup").is_constraint_violation());
    }

    #[test]
    fn test_update_missing() {
        let conn = crate::open_memory().expect("open");
        let err = update(&conn, &Uuid::new_v4(), "active", &serde_json::json!({}), 1)
            .expect_err("missing");
        assert!(matches!(err, DbError::NotFound(_)));
    }
}
