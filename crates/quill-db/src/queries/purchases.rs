//! Content purchase records.

use quill_types::content::ContentType;
use quill_types::{ContentId, TransactionId, UserId};
use rusqlite::Connection;

use crate::{from_sql_u64, parse_uuid, to_sql_u64, Result};

/// A paid content unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRow {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub writer_id: UserId,
    pub coin_amount: u64,
    pub purchased_at: u64,
}

/// Record a purchase. Re-recording the same transaction is a no-op.
pub fn record(conn: &Connection, purchase: &PurchaseRow) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO content_purchases
         (transaction_id, user_id, content_id, content_type, writer_id, coin_amount, purchased_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            purchase.transaction_id.to_string(),
            purchase.user_id.to_string(),
            purchase.content_id.to_string(),
            purchase.content_type.as_str(),
            purchase.writer_id.to_string(),
            to_sql_u64(purchase.coin_amount),
            to_sql_u64(purchase.purchased_at),
        ],
    )?;
    Ok(())
}

/// Coins spent on each writer's content with `purchased_at` in `[start, end)`.
///
/// Writers with no purchases in the window are absent.
pub fn coins_by_writer(conn: &Connection, start: u64, end: u64) -> Result<Vec<(UserId, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT writer_id, SUM(coin_amount) FROM content_purchases
         WHERE purchased_at >= ?1 AND purchased_at < ?2
         GROUP BY writer_id
         ORDER BY writer_id",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![to_sql_u64(start), to_sql_u64(end)],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(writer, coins)| Ok((parse_uuid(&writer)?, from_sql_u64(coins))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::transactions;
    use quill_types::ledger::{Transaction, TransactionStatus, TransactionType};
    use uuid::Uuid;

    fn spend(conn: &Connection, coins: i64) -> TransactionId {
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tx_type: TransactionType::CoinSpend,
            coin_amount: -coins,
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
        transactions::insert(conn, &tx).expect("insert tx");
        tx.id
    }

    #[test]
    fn test_coins_by_writer() {
        let conn = crate::open_memory().expect("open");
        let w1 = Uuid::new_v4();
        let w2 = Uuid::new_v4();

        for (writer, coins, at) in [(w1, 10, 100), (w1, 20, 150), (w2, 70, 120), (w2, 5, 300)] {
            let purchase = PurchaseRow {
                transaction_id: spend(&conn, coins),
                user_id: Uuid::new_v4(),
                content_id: Uuid::new_v4(),
                content_type: ContentType::Chapter,
                writer_id: writer,
                coin_amount: coins as u64,
                purchased_at: at,
            };
            record(&conn, &purchase).expect("record");
            record(&conn, &purchase).expect("re-record is a no-op");
        }

        let mut scores = coins_by_writer(&conn, 100, 200).expect("scores");
        scores.sort_by_key(|(_, coins)| *coins);
        assert_eq!(scores, vec![(w1, 30), (w2, 70)]);
    }
}
