//! Bookkeeping for distributions that run outside a single request:
//! subscription pool runs and content purchases awaiting reconciliation.

use quill_types::{TransactionId, UserId};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::{from_sql_u64, parse_opt_decimal, parse_uuid, to_sql_u64, DbError, Result};

/// Lifecycle of one subscription pool period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolRunStatus {
    Running,
    Completed,
    Failed,
}

impl PoolRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRunStatus::Running => "running",
            PoolRunStatus::Completed => "completed",
            PoolRunStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(PoolRunStatus::Running),
            "completed" => Ok(PoolRunStatus::Completed),
            "failed" => Ok(PoolRunStatus::Failed),
            other => Err(DbError::Corrupt(format!("unknown pool run status {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoolRun {
    pub period_start: u64,
    pub period_end: u64,
    pub status: PoolRunStatus,
    pub gross_pool: Option<Decimal>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

pub fn get_pool_run(conn: &Connection, period_start: u64, period_end: u64) -> Result<Option<PoolRun>> {
    let row = conn
        .query_row(
            "SELECT status, gross_pool, started_at, finished_at FROM pool_runs
             WHERE period_start = ?1 AND period_end = ?2",
            rusqlite::params![to_sql_u64(period_start), to_sql_u64(period_end)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(status, gross, started, finished)| {
        Ok(PoolRun {
            period_start,
            period_end,
            status: PoolRunStatus::parse(&status)?,
            gross_pool: parse_opt_decimal(gross)?,
            started_at: from_sql_u64(started),
            finished_at: finished.map(from_sql_u64),
        })
    })
    .transpose()
}

/// Mark a period `running`. A previously failed run is re-claimed; any other
/// existing run is returned unchanged and nothing is written.
///
/// Returns `Ok(None)` when the caller now owns the run.
pub fn claim_pool_run(
    conn: &Connection,
    period_start: u64,
    period_end: u64,
    now: u64,
) -> Result<Option<PoolRun>> {
    match get_pool_run(conn, period_start, period_end)? {
        Some(run) if run.status != PoolRunStatus::Failed => Ok(Some(run)),
        _ => {
            conn.execute(
                "INSERT INTO pool_runs (period_start, period_end, status, started_at)
                 VALUES (?1, ?2, 'running', ?3)
                 ON CONFLICT(period_start, period_end) DO UPDATE SET
                    status = 'running',
                    gross_pool = NULL,
                    started_at = excluded.started_at,
                    finished_at = NULL",
                rusqlite::params![to_sql_u64(period_start), to_sql_u64(period_end), to_sql_u64(now)],
            )?;
            Ok(None)
        }
    }
}

/// Close a running period with its final status.
pub fn finish_pool_run(
    conn: &Connection,
    period_start: u64,
    period_end: u64,
    status: PoolRunStatus,
    gross_pool: Option<Decimal>,
    now: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE pool_runs SET status = ?1, gross_pool = ?2, finished_at = ?3
         WHERE period_start = ?4 AND period_end = ?5 AND status = 'running'",
        rusqlite::params![
            status.as_str(),
            gross_pool.map(|d| d.to_string()),
            to_sql_u64(now),
            to_sql_u64(period_start),
            to_sql_u64(period_end),
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!(
            "running pool run [{period_start}, {period_end})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pending distributions
// ---------------------------------------------------------------------------

/// A committed coin spend whose revenue split has not been recorded yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDistribution {
    pub transaction_id: TransactionId,
    pub writer_id: UserId,
    pub reason: String,
    pub attempts: u32,
    pub queued_at: u64,
}

/// Queue a spend for reconciliation. Re-queuing updates the reason.
pub fn queue_pending(
    conn: &Connection,
    transaction_id: &TransactionId,
    writer_id: &UserId,
    reason: &str,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_distributions (transaction_id, writer_id, reason, queued_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(transaction_id) DO UPDATE SET reason = excluded.reason",
        rusqlite::params![
            transaction_id.to_string(),
            writer_id.to_string(),
            reason,
            to_sql_u64(now),
        ],
    )?;
    Ok(())
}

/// Oldest queued spends first.
pub fn list_pending(conn: &Connection, limit: u32) -> Result<Vec<PendingDistribution>> {
    let mut stmt = conn.prepare(
        "SELECT transaction_id, writer_id, reason, attempts, queued_at
         FROM pending_distributions ORDER BY queued_at, rowid LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(tx, writer, reason, attempts, queued_at)| {
            Ok(PendingDistribution {
                transaction_id: parse_uuid(&tx)?,
                writer_id: parse_uuid(&writer)?,
                reason,
                attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                queued_at: from_sql_u64(queued_at),
            })
        })
        .collect()
}

pub fn remove_pending(conn: &Connection, transaction_id: &TransactionId) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_distributions WHERE transaction_id = ?1",
        [transaction_id.to_string()],
    )?;
    Ok(())
}

pub fn record_attempt(conn: &Connection, transaction_id: &TransactionId, reason: &str) -> Result<()> {
    conn.execute(
        "UPDATE pending_distributions SET attempts = attempts + 1, reason = ?1
         WHERE transaction_id = ?2",
        rusqlite::params![reason, transaction_id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::transactions;
    use quill_types::ledger::{Transaction, TransactionStatus, TransactionType};
    use uuid::Uuid;

    #[test]
    fn test_pool_run_claim_cycle() {
        let conn = crate::open_memory().expect("open");
        assert!(claim_pool_run(&conn, 0, 100, 1).expect("claim").is_none());

        let running = claim_pool_run(&conn, 0, 100, 2).expect("claim").expect("existing");
        assert_eq!(running.status, PoolRunStatus::Running);

        finish_pool_run(&conn, 0, 100, PoolRunStatus::Failed, None, 3).expect("fail");
        assert!(claim_pool_run(&conn, 0, 100, 4).expect("reclaim").is_none());

        finish_pool_run(&conn, 0, 100, PoolRunStatus::Completed, Some(Decimal::new(1000, 0)), 5)
            .expect("complete");
        let done = claim_pool_run(&conn, 0, 100, 6).expect("claim").expect("existing");
        assert_eq!(done.status, PoolRunStatus::Completed);
        assert_eq!(done.gross_pool, Some(Decimal::new(1000, 0)));
        assert!(finish_pool_run(&conn, 0, 100, PoolRunStatus::Failed, None, 7).is_err());
    }

    #[test]
    fn test_pending_queue() {
        let conn = crate::open_memory().expect("open");
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tx_type: TransactionType::CoinSpend,
            coin_amount: -10,
            fiat_amount: None,
            currency: None,
            status: TransactionStatus::Completed,
            related_content_id: None,
            external_transaction_id: None,
            counterpart_id: None,
            description: None,
            failure_reason: None,
            created_at: 1,
            completed_at: Some(1),
        };
        transactions::insert(&conn, &tx).expect("insert tx");
        let writer = Uuid::new_v4();

        queue_pending(&conn, &tx.id, &writer, "storage unavailable", 5).expect("queue");
        record_attempt(&conn, &tx.id, "still unavailable").expect("attempt");
        let pending = list_pending(&conn, 10).expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].reason, "still unavailable");

        remove_pending(&conn, &tx.id).expect("remove");
        assert!(list_pending(&conn, 10).expect("list").is_empty());
    }
}
