//! Revenue split records and writer earnings accumulators.
//!
//! A split is inserted once per source. The unique indexes on
//! `transaction_id` and `(workflow_id, reference)` reject a second split
//! for the same coin spend or licensing payment.

use quill_types::revenue::{
    RevenueEventType, RevenueSplit, SplitPercentages, SplitSource,
};
use quill_types::{TransactionId, UserId, WorkflowId};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::{
    from_sql_u64, parse_decimal, parse_opt_decimal, parse_opt_uuid, parse_tag, parse_uuid,
    to_sql_u64, DbError, Result,
};

const COLUMNS: &str = "id, event_type, source_kind, transaction_id, workflow_id, reference,
     period_start, period_end, writer_id, studio_id, gross_amount, writer_share,
     studio_share, platform_share, writer_pct, studio_pct, platform_pct, currency, created_at";

/// Insert a split row.
pub fn insert(conn: &Connection, split: &RevenueSplit) -> Result<()> {
    let (kind, transaction_id, workflow_id, reference, period_start, period_end) =
        match &split.source {
            SplitSource::Unattributed => ("unattributed", None, None, None, None, None),
            SplitSource::Transaction { transaction_id } => (
                "transaction",
                Some(transaction_id.to_string()),
                None,
                None,
                None,
                None,
            ),
            SplitSource::Workflow {
                workflow_id,
                reference,
            } => (
                "workflow",
                None,
                Some(workflow_id.to_string()),
                Some(reference.clone()),
                None,
                None,
            ),
            SplitSource::SubscriptionPool {
                period_start,
                period_end,
            } => (
                "subscription_pool",
                None,
                None,
                None,
                Some(to_sql_u64(*period_start)),
                Some(to_sql_u64(*period_end)),
            ),
        };

    conn.execute(
        "INSERT INTO revenue_splits
         (id, event_type, source_kind, transaction_id, workflow_id, reference,
          period_start, period_end, writer_id, studio_id, gross_amount, writer_share,
          studio_share, platform_share, writer_pct, studio_pct, platform_pct, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        rusqlite::params![
            split.id.to_string(),
            split.event_type.as_str(),
            kind,
            transaction_id,
            workflow_id,
            reference,
            period_start,
            period_end,
            split.writer_id.map(|id| id.to_string()),
            split.studio_id.map(|id| id.to_string()),
            split.gross_amount.to_string(),
            split.writer_share.to_string(),
            split.studio_share.map(|d| d.to_string()),
            split.platform_share.to_string(),
            i64::from(split.percentages.writer_pct),
            i64::from(split.percentages.studio_pct),
            i64::from(split.percentages.platform_pct),
            split.currency,
            to_sql_u64(split.created_at),
        ],
    )?;
    Ok(())
}

/// The split recorded for a coin spend, if any.
pub fn find_by_transaction(
    conn: &Connection,
    transaction_id: &TransactionId,
) -> Result<Option<RevenueSplit>> {
    let sql = format!("SELECT {COLUMNS} FROM revenue_splits WHERE transaction_id = ?1");
    let raw = conn
        .query_row(&sql, [transaction_id.to_string()], RawSplit::from_row)
        .optional()?;
    raw.map(RawSplit::into_split).transpose()
}

/// The split recorded for a licensing payment, if any.
pub fn find_by_workflow_reference(
    conn: &Connection,
    workflow_id: &WorkflowId,
    reference: &str,
) -> Result<Option<RevenueSplit>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM revenue_splits WHERE workflow_id = ?1 AND reference = ?2"
    );
    let raw = conn
        .query_row(
            &sql,
            rusqlite::params![workflow_id.to_string(), reference],
            RawSplit::from_row,
        )
        .optional()?;
    raw.map(RawSplit::into_split).transpose()
}

/// All splits of one subscription pool period.
pub fn list_for_period(conn: &Connection, period_start: u64, period_end: u64) -> Result<Vec<RevenueSplit>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM revenue_splits
         WHERE period_start = ?1 AND period_end = ?2 ORDER BY rowid"
    );
    query_splits(
        conn,
        &sql,
        rusqlite::params![to_sql_u64(period_start), to_sql_u64(period_end)],
    )
}

/// All splits of one licensing workflow, oldest first.
pub fn list_for_workflow(conn: &Connection, workflow_id: &WorkflowId) -> Result<Vec<RevenueSplit>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM revenue_splits WHERE workflow_id = ?1 ORDER BY rowid"
    );
    query_splits(conn, &sql, rusqlite::params![workflow_id.to_string()])
}

/// A writer's splits, newest first.
pub fn list_for_writer(conn: &Connection, writer_id: &UserId, limit: u32) -> Result<Vec<RevenueSplit>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM revenue_splits
         WHERE writer_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    );
    query_splits(conn, &sql, rusqlite::params![writer_id.to_string(), limit])
}

fn query_splits(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<RevenueSplit>> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, RawSplit::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawSplit::into_split).collect()
}

// ---------------------------------------------------------------------------
// Writer earnings
// ---------------------------------------------------------------------------

/// Add `amount` to a writer's lifetime earnings.
///
/// Read-modify-write on a TEXT decimal. Call inside [`crate::Db::with_tx`].
pub fn add_earnings(conn: &Connection, writer_id: &UserId, amount: Decimal, now: u64) -> Result<Decimal> {
    let total = total_earned(conn, writer_id)? + amount;
    conn.execute(
        "INSERT INTO writer_earnings (writer_id, total_earned, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(writer_id) DO UPDATE SET
            total_earned = excluded.total_earned,
            updated_at = excluded.updated_at",
        rusqlite::params![writer_id.to_string(), total.to_string(), to_sql_u64(now)],
    )?;
    Ok(total)
}

/// Lifetime earnings credited to a writer. Zero for unknown writers.
pub fn total_earned(conn: &Connection, writer_id: &UserId) -> Result<Decimal> {
    let value: Option<String> = conn
        .query_row(
            "SELECT total_earned FROM writer_earnings WHERE writer_id = ?1",
            [writer_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(text) => parse_decimal(&text),
        None => Ok(Decimal::ZERO),
    }
}

/// A split row before tag and decimal parsing.
struct RawSplit {
    id: String,
    event_type: String,
    source_kind: String,
    transaction_id: Option<String>,
    workflow_id: Option<String>,
    reference: Option<String>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    writer_id: Option<String>,
    studio_id: Option<String>,
    gross_amount: String,
    writer_share: String,
    studio_share: Option<String>,
    platform_share: String,
    writer_pct: i64,
    studio_pct: i64,
    platform_pct: i64,
    currency: String,
    created_at: i64,
}

impl RawSplit {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_type: row.get(1)?,
            source_kind: row.get(2)?,
            transaction_id: row.get(3)?,
            workflow_id: row.get(4)?,
            reference: row.get(5)?,
            period_start: row.get(6)?,
            period_end: row.get(7)?,
            writer_id: row.get(8)?,
            studio_id: row.get(9)?,
            gross_amount: row.get(10)?,
            writer_share: row.get(11)?,
            studio_share: row.get(12)?,
            platform_share: row.get(13)?,
            writer_pct: row.get(14)?,
            studio_pct: row.get(15)?,
            platform_pct: row.get(16)?,
            currency: row.get(17)?,
            created_at: row.get(18)?,
        })
    }

    fn into_split(self) -> Result<RevenueSplit> {
        let source = match self.source_kind.as_str() {
            "unattributed" => SplitSource::Unattributed,
            "transaction" => SplitSource::Transaction {
                transaction_id: parse_uuid(self.transaction_id.as_deref().unwrap_or_default())?,
            },
            "workflow" => SplitSource::Workflow {
                workflow_id: parse_uuid(self.workflow_id.as_deref().unwrap_or_default())?,
                reference: self.reference.unwrap_or_default(),
            },
            "subscription_pool" => SplitSource::SubscriptionPool {
                period_start: self.period_start.map(from_sql_u64).unwrap_or_default(),
                period_end: self.period_end.map(from_sql_u64).unwrap_or_default(),
            },
            other => {
                return Err(DbError::Corrupt(format!("unknown split source {other:?}")));
            }
        };

        Ok(RevenueSplit {
            id: parse_uuid(&self.id)?,
            event_type: parse_tag::<RevenueEventType>(&self.event_type)?,
            source,
            writer_id: parse_opt_uuid(self.writer_id)?,
            studio_id: parse_opt_uuid(self.studio_id)?,
            gross_amount: parse_decimal(&self.gross_amount)?,
            writer_share: parse_decimal(&self.writer_share)?,
            studio_share: parse_opt_decimal(self.studio_share)?,
            platform_share: parse_decimal(&self.platform_share)?,
            percentages: SplitPercentages::new(
                pct(self.writer_pct)?,
                pct(self.studio_pct)?,
                pct(self.platform_pct)?,
            ),
            currency: self.currency,
            created_at: from_sql_u64(self.created_at),
        })
    }
}

fn pct(value: i64) -> Result<u8> {
    u8::try_from(value).map_err(|_| DbError::Corrupt(format!("bad percentage {value}")))
}
