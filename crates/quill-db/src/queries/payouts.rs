//! Payout request query functions.

use quill_types::payout::{PayoutRequest, PayoutStatus};
use quill_types::{PayoutId, UserId};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::{from_sql_u64, parse_decimal, parse_tag, parse_uuid, to_sql_u64, DbError, Result};

const COLUMNS: &str = "id, writer_id, amount, currency, payment_details, status,
     external_payout_id, idempotency_key, failure_reason, created_at, processed_at";

pub fn insert(conn: &Connection, request: &PayoutRequest) -> Result<()> {
    conn.execute(
        "INSERT INTO payout_requests
         (id, writer_id, amount, currency, payment_details, status,
          external_payout_id, idempotency_key, failure_reason, created_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            request.id.to_string(),
            request.writer_id.to_string(),
            request.amount.to_string(),
            request.currency,
            serde_json::to_string(&request.payment_details)?,
            request.status.as_str(),
            request.external_payout_id,
            request.idempotency_key,
            request.failure_reason,
            to_sql_u64(request.created_at),
            request.processed_at.map(to_sql_u64),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &PayoutId) -> Result<Option<PayoutRequest>> {
    let sql = format!("SELECT {COLUMNS} FROM payout_requests WHERE id = ?1");
    let raw = conn
        .query_row(&sql, [id.to_string()], RawPayout::from_row)
        .optional()?;
    raw.map(RawPayout::into_request).transpose()
}

/// The live (non-failed) request a writer filed under an idempotency key.
pub fn find_by_idempotency_key(
    conn: &Connection,
    writer_id: &UserId,
    key: &str,
) -> Result<Option<PayoutRequest>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM payout_requests
         WHERE writer_id = ?1 AND idempotency_key = ?2 AND status != 'failed'"
    );
    let raw = conn
        .query_row(
            &sql,
            rusqlite::params![writer_id.to_string(), key],
            RawPayout::from_row,
        )
        .optional()?;
    raw.map(RawPayout::into_request).transpose()
}

/// Move a pending request to `completed`.
pub fn mark_completed(
    conn: &Connection,
    id: &PayoutId,
    external_payout_id: Option<&str>,
    at: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE payout_requests
         SET status = 'completed', external_payout_id = ?1, processed_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        rusqlite::params![external_payout_id, to_sql_u64(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending payout {id}")));
    }
    Ok(())
}

/// Move a pending request to `failed`, releasing its reserved amount.
pub fn mark_failed(conn: &Connection, id: &PayoutId, reason: &str, at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE payout_requests
         SET status = 'failed', failure_reason = ?1, processed_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        rusqlite::params![reason, to_sql_u64(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending payout {id}")));
    }
    Ok(())
}

/// Sum of a writer's request amounts in one status.
pub fn sum_by_status(conn: &Connection, writer_id: &UserId, status: PayoutStatus) -> Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT amount FROM payout_requests WHERE writer_id = ?1 AND status = ?2",
    )?;
    let amounts = stmt
        .query_map(
            rusqlite::params![writer_id.to_string(), status.as_str()],
            |row| row.get::<_, String>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    amounts
        .iter()
        .try_fold(Decimal::ZERO, |acc, text| Ok(acc + parse_decimal(text)?))
}

/// A writer's requests, newest first.
pub fn list_for_writer(conn: &Connection, writer_id: &UserId, limit: u32) -> Result<Vec<PayoutRequest>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM payout_requests
         WHERE writer_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(rusqlite::params![writer_id.to_string(), limit], RawPayout::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawPayout::into_request).collect()
}

/// Pending requests across all writers, oldest first.
pub fn list_pending(conn: &Connection, limit: u32) -> Result<Vec<PayoutRequest>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM payout_requests
         WHERE status = 'pending' ORDER BY created_at, rowid LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([limit], RawPayout::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawPayout::into_request).collect()
}

struct RawPayout {
    id: String,
    writer_id: String,
    amount: String,
    currency: String,
    payment_details: String,
    status: String,
    external_payout_id: Option<String>,
    idempotency_key: Option<String>,
    failure_reason: Option<String>,
    created_at: i64,
    processed_at: Option<i64>,
}

impl RawPayout {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            writer_id: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            payment_details: row.get(4)?,
            status: row.get(5)?,
            external_payout_id: row.get(6)?,
            idempotency_key: row.get(7)?,
            failure_reason: row.get(8)?,
            created_at: row.get(9)?,
            processed_at: row.get(10)?,
        })
    }

    fn into_request(self) -> Result<PayoutRequest> {
        Ok(PayoutRequest {
            id: parse_uuid(&self.id)?,
            writer_id: parse_uuid(&self.writer_id)?,
            amount: parse_decimal(&self.amount)?,
            currency: self.currency,
            payment_details: serde_json::from_str(&self.payment_details)?,
            status: parse_tag::<PayoutStatus>(&self.status)?,
            external_payout_id: self.external_payout_id,
            idempotency_key: self.idempotency_key,
            failure_reason: self.failure_reason,
            created_at: from_sql_u64(self.created_at),
            processed_at: self.processed_at.map(from_sql_u64),
        })
    }
}
