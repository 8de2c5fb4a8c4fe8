//! Transaction log query functions.
//!
//! Rows are inserted `pending` and updated exactly once to a terminal status.
//! `coin_amount` is never updated.

use quill_types::ledger::{Transaction, TransactionStatus, TransactionType};
use quill_types::{ContentId, TransactionId, UserId};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    from_sql_u64, parse_opt_decimal, parse_opt_uuid, parse_tag, parse_uuid, to_sql_u64, DbError,
    Result,
};

const COLUMNS: &str = "id, user_id, tx_type, coin_amount, fiat_amount, currency, status,
     related_content_id, external_transaction_id, counterpart_id, description,
     failure_reason, created_at, completed_at";

/// Insert a transaction row exactly as given.
pub fn insert(conn: &Connection, tx: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions
         (id, user_id, tx_type, coin_amount, fiat_amount, currency, status,
          related_content_id, external_transaction_id, counterpart_id, description,
          failure_reason, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            tx.id.to_string(),
            tx.user_id.to_string(),
            tx.tx_type.as_str(),
            tx.coin_amount,
            tx.fiat_amount.map(|d| d.to_string()),
            tx.currency,
            tx.status.as_str(),
            tx.related_content_id.map(|id| id.to_string()),
            tx.external_transaction_id,
            tx.counterpart_id.map(|id| id.to_string()),
            tx.description,
            tx.failure_reason,
            to_sql_u64(tx.created_at),
            tx.completed_at.map(to_sql_u64),
        ],
    )?;
    Ok(())
}

/// Move a pending transaction to `completed`.
pub fn mark_completed(conn: &Connection, id: &TransactionId, completed_at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE transactions SET status = 'completed', completed_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        rusqlite::params![to_sql_u64(completed_at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending transaction {id}")));
    }
    Ok(())
}

/// Move a pending transaction to `failed`.
pub fn mark_failed(conn: &Connection, id: &TransactionId, reason: &str, at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE transactions SET status = 'failed', failure_reason = ?1, completed_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        rusqlite::params![reason, to_sql_u64(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("pending transaction {id}")));
    }
    Ok(())
}

/// Get one transaction by id.
pub fn get(conn: &Connection, id: &TransactionId) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {COLUMNS} FROM transactions WHERE id = ?1");
    let raw = conn
        .query_row(&sql, [id.to_string()], RawTransaction::from_row)
        .optional()?;
    raw.map(RawTransaction::into_transaction).transpose()
}

/// Find the live (non-failed) transaction a user posted under an idempotency key.
pub fn find_by_external_id(
    conn: &Connection,
    user_id: &UserId,
    external_id: &str,
) -> Result<Option<Transaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM transactions
         WHERE user_id = ?1 AND external_transaction_id = ?2 AND status != 'failed'"
    );
    let raw = conn
        .query_row(
            &sql,
            rusqlite::params![user_id.to_string(), external_id],
            RawTransaction::from_row,
        )
        .optional()?;
    raw.map(RawTransaction::into_transaction).transpose()
}

/// A user's transactions, newest first, in commit order.
pub fn list_for_user(
    conn: &Connection,
    user_id: &UserId,
    limit: u32,
    offset: u32,
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM transactions
         WHERE user_id = ?1 ORDER BY seq DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(
            rusqlite::params![user_id.to_string(), limit, offset],
            RawTransaction::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawTransaction::into_transaction).collect()
}

/// Whether the user holds a completed coin spend on this content that has a
/// matching `content_purchases` row. Spends without one do not unlock.
pub fn completed_spend_exists(
    conn: &Connection,
    user_id: &UserId,
    content_id: &ContentId,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions t
         JOIN content_purchases p ON p.transaction_id = t.id
         WHERE t.user_id = ?1 AND t.related_content_id = ?2
           AND p.user_id = ?1 AND p.content_id = ?2
           AND t.tx_type = 'coin_spend' AND t.status = 'completed'",
        rusqlite::params![user_id.to_string(), content_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Completed transactions of one type whose completion falls in `[start, end)`.
pub fn completed_in_window(
    conn: &Connection,
    tx_type: TransactionType,
    start: u64,
    end: u64,
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM transactions
         WHERE tx_type = ?1 AND status = 'completed'
           AND completed_at >= ?2 AND completed_at < ?3
         ORDER BY seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(
            rusqlite::params![tx_type.as_str(), to_sql_u64(start), to_sql_u64(end)],
            RawTransaction::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawTransaction::into_transaction).collect()
}

/// A transaction row before tag and id parsing.
struct RawTransaction {
    id: String,
    user_id: String,
    tx_type: String,
    coin_amount: i64,
    fiat_amount: Option<String>,
    currency: Option<String>,
    status: String,
    related_content_id: Option<String>,
    external_transaction_id: Option<String>,
    counterpart_id: Option<String>,
    description: Option<String>,
    failure_reason: Option<String>,
    created_at: i64,
    completed_at: Option<i64>,
}

impl RawTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            tx_type: row.get(2)?,
            coin_amount: row.get(3)?,
            fiat_amount: row.get(4)?,
            currency: row.get(5)?,
            status: row.get(6)?,
            related_content_id: row.get(7)?,
            external_transaction_id: row.get(8)?,
            counterpart_id: row.get(9)?,
            description: row.get(10)?,
            failure_reason: row.get(11)?,
            created_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            tx_type: parse_tag::<TransactionType>(&self.tx_type)?,
            coin_amount: self.coin_amount,
            fiat_amount: parse_opt_decimal(self.fiat_amount)?,
            currency: self.currency,
            status: parse_tag::<TransactionStatus>(&self.status)?,
            related_content_id: parse_opt_uuid(self.related_content_id)?,
            external_transaction_id: self.external_transaction_id,
            counterpart_id: parse_opt_uuid(self.counterpart_id)?,
            description: self.description,
            failure_reason: self.failure_reason,
            created_at: from_sql_u64(self.created_at),
            completed_at: self.completed_at.map(from_sql_u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn pending(user: UserId, tx_type: TransactionType, coins: i64, key: Option<&str>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: user,
            tx_type,
            coin_amount: coins,
            fiat_amount: None,
            currency: None,
            status: TransactionStatus::Pending,
            related_content_id: None,
            external_transaction_id: key.map(str::to_string),
            counterpart_id: None,
            description: None,
            failure_reason: None,
            created_at: 100,
            completed_at: None,
        }
    }

    #[test]
    fn test_insert_and_complete() {
        let conn = test_db();
        let tx = pending(Uuid::new_v4(), TransactionType::CoinPurchase, 500, None);
        insert(&conn, &tx).expect("insert");
        mark_completed(&conn, &tx.id, 101).expect("complete");

        let stored = get(&conn, &tx.id).expect("get").expect("row");
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.completed_at, Some(101));
        assert_eq!(stored.coin_amount, 500);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let conn = test_db();
        let tx = pending(Uuid::new_v4(), TransactionType::CoinSpend, -5, None);
        insert(&conn, &tx).expect("insert");
        mark_failed(&conn, &tx.id, "insufficient funds", 101).expect("fail");
        assert!(mark_completed(&conn, &tx.id, 102).is_err());
        assert!(mark_failed(&conn, &tx.id, "again", 102).is_err());
    }

    #[test]
    fn test_history_newest_first() {
        let conn = test_db();
        let user = Uuid::new_v4();
        let first = pending(user, TransactionType::CoinPurchase, 10, None);
        let second = pending(user, TransactionType::CoinSpend, -3, None);
        insert(&conn, &first).expect("insert");
        insert(&conn, &second).expect("insert");
        insert(&conn, &pending(Uuid::new_v4(), TransactionType::Tip, 1, None)).expect("insert");

        let history = list_for_user(&conn, &user, 10, 0).expect("list");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);

        let page = list_for_user(&conn, &user, 10, 1).expect("list");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
    }

    #[test]
    fn test_idempotency_key_unique_while_live() {
        let conn = test_db();
        let user = Uuid::new_v4();
        let tx = pending(user, TransactionType::CoinPurchase, 10, Some("pay_1"));
        insert(&conn, &tx).expect("insert");

        let dup = pending(user, TransactionType::CoinPurchase, 10, Some("pay_1"));
        let err = insert(&conn, &dup).expect_err("duplicate key");
        assert!(err.is_constraint_violation());

        // A failed attempt frees the key for a retry.
        mark_failed(&conn, &tx.id, "gateway declined", 101).expect("fail");
        insert(&conn, &dup).expect("retry after failure");
        let live = find_by_external_id(&conn, &user, "pay_1").expect("find").expect("row");
        assert_eq!(live.id, dup.id);
    }

    #[test]
    fn test_completed_spend_exists() {
        let conn = test_db();
        let user = Uuid::new_v4();
        let content = Uuid::new_v4();
        let mut tx = pending(user, TransactionType::CoinSpend, -10, None);
        tx.related_content_id = Some(content);
        insert(&conn, &tx).expect("insert");
        assert!(!completed_spend_exists(&conn, &user, &content).expect("check"));

        mark_completed(&conn, &tx.id, 101).expect("complete");
        assert!(!completed_spend_exists(&conn, &user, &content).expect("unrecorded spend"));

        let purchase = crate::queries::purchases::PurchaseRow {
            transaction_id: tx.id,
            user_id: user,
            content_id: content,
            content_type: quill_types::content::ContentType::Chapter,
            writer_id: Uuid::new_v4(),
            coin_amount: 10,
            purchased_at: 101,
        };
        crate::queries::purchases::record(&conn, &purchase).expect("record");
        assert!(completed_spend_exists(&conn, &user, &content).expect("check"));
    }

    #[test]
    fn test_completed_in_window() {
        let conn = test_db();
        for completed_at in [50_u64, 100, 150, 200] {
            let tx = pending(Uuid::new_v4(), TransactionType::Subscription, 0, None);
            insert(&conn, &tx).expect("insert");
            mark_completed(&conn, &tx.id, completed_at).expect("complete");
        }
        let window = completed_in_window(&conn, TransactionType::Subscription, 100, 200)
            .expect("window");
        assert_eq!(window.len(), 2);
    }
}
