//! Coin balance query functions.
//!
//! Balance changes are single conditional statements so that the
//! sufficiency check and the write cannot be separated by another writer.

use quill_types::ledger::CoinBalance;
use quill_types::UserId;
use rusqlite::{Connection, OptionalExtension};

use crate::{from_sql_u64, to_sql_u64, DbError, Result};

/// Create a zero balance for `user_id` if none exists.
pub fn ensure(conn: &Connection, user_id: &UserId, now: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO coin_balances (user_id, created_at, updated_at)
         VALUES (?1, ?2, ?2)",
        rusqlite::params![user_id.to_string(), to_sql_u64(now)],
    )?;
    Ok(())
}

/// Fetch a balance row without creating it.
pub fn fetch(conn: &Connection, user_id: &UserId) -> Result<Option<CoinBalance>> {
    let row = conn
        .query_row(
            "SELECT balance, lifetime_earned, lifetime_spent
             FROM coin_balances WHERE user_id = ?1",
            [user_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(balance, earned, spent)| CoinBalance {
        user_id: *user_id,
        balance: from_sql_u64(balance),
        lifetime_earned: from_sql_u64(earned),
        lifetime_spent: from_sql_u64(spent),
    }))
}

/// Fetch a balance, creating a zero row on first access.
pub fn get_or_create(conn: &Connection, user_id: &UserId, now: u64) -> Result<CoinBalance> {
    ensure(conn, user_id, now)?;
    fetch(conn, user_id)?
        .ok_or_else(|| DbError::NotFound(format!("balance for {user_id}")))
}

/// Add coins to a balance. The row must exist.
///
/// Returns `false` when the new balance or lifetime total would leave the
/// `INTEGER` range; nothing is written in that case.
pub fn credit(conn: &Connection, user_id: &UserId, amount: u64, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE coin_balances
         SET balance = balance + ?1,
             lifetime_earned = lifetime_earned + ?1,
             updated_at = ?3
         WHERE user_id = ?2
           AND balance <= ?4 - ?1
           AND lifetime_earned <= ?4 - ?1",
        rusqlite::params![to_sql_u64(amount), user_id.to_string(), to_sql_u64(now), i64::MAX],
    )?;
    if updated == 1 {
        return Ok(true);
    }
    if fetch(conn, user_id)?.is_none() {
        return Err(DbError::NotFound(format!("balance for {user_id}")));
    }
    Ok(false)
}

/// Remove coins from a balance if and only if it holds at least `amount`.
///
/// Returns `false` when the balance is insufficient (or missing); nothing is
/// written in that case.
pub fn try_debit(conn: &Connection, user_id: &UserId, amount: u64, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE coin_balances
         SET balance = balance - ?1,
             lifetime_spent = lifetime_spent + ?1,
             updated_at = ?3
         WHERE user_id = ?2 AND balance >= ?1",
        rusqlite::params![to_sql_u64(amount), user_id.to_string(), to_sql_u64(now)],
    )?;
    Ok(updated == 1)
}

/// Sum of every balance. Used by conservation checks.
pub fn total_supply(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(balance), 0) FROM coin_balances",
        [],
        |row| row.get(0),
    )?;
    Ok(from_sql_u64(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_lazy_zero_balance() {
        let conn = test_db();
        let user = Uuid::new_v4();
        assert!(fetch(&conn, &user).expect("fetch").is_none());
        let balance = get_or_create(&conn, &user, 10).expect("get");
        assert_eq!(balance, CoinBalance::empty(user));
    }

    #[test]
    fn test_credit_and_debit() {
        let conn = test_db();
        let user = Uuid::new_v4();
        ensure(&conn, &user, 1).expect("ensure");
        credit(&conn, &user, 100, 2).expect("credit");
        assert!(try_debit(&conn, &user, 30, 3).expect("debit"));

        let balance = fetch(&conn, &user).expect("fetch").expect("row");
        assert_eq!(balance.balance, 70);
        assert_eq!(balance.lifetime_earned, 100);
        assert_eq!(balance.lifetime_spent, 30);
    }

    #[test]
    fn test_debit_insufficient_writes_nothing() {
        let conn = test_db();
        let user = Uuid::new_v4();
        ensure(&conn, &user, 1).expect("ensure");
        credit(&conn, &user, 50, 2).expect("credit");
        assert!(!try_debit(&conn, &user, 51, 3).expect("debit"));

        let balance = fetch(&conn, &user).expect("fetch").expect("row");
        assert_eq!(balance.balance, 50);
        assert_eq!(balance.lifetime_spent, 0);
    }

    #[test]
    fn test_debit_missing_row() {
        let conn = test_db();
        assert!(!try_debit(&conn, &Uuid::new_v4(), 1, 1).expect("debit"));
    }

    #[test]
    fn test_credit_missing_row() {
        let conn = test_db();
        assert!(credit(&conn, &Uuid::new_v4(), 1, 1).is_err());
    }

    #[test]
    fn test_credit_past_integer_range_refused() {
        let conn = test_db();
        let user = Uuid::new_v4();
        ensure(&conn, &user, 1).expect("ensure");
        assert!(credit(&conn, &user, i64::MAX as u64 - 5, 2).expect("credit"));
        assert!(!credit(&conn, &user, 6, 3).expect("credit"));
        assert!(credit(&conn, &user, 5, 4).expect("credit"));

        let balance = fetch(&conn, &user).expect("fetch").expect("row");
        assert_eq!(balance.balance, i64::MAX as u64);
        assert_eq!(balance.lifetime_earned, i64::MAX as u64);
    }

    #[test]
    fn test_total_supply() {
        let conn = test_db();
        for amount in [10, 20, 30] {
            let user = Uuid::new_v4();
            ensure(&conn, &user, 1).expect("ensure");
            credit(&conn, &user, amount, 1).expect("credit");
        }
        assert_eq!(total_supply(&conn).expect("supply"), 60);
    }
}
