//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Upgrades from the previous version, as `(target_version, sql)`.
/// Version 1 is created from [`schema::SCHEMA_V1`] directly.
const UPGRADES: &[(u32, &str)] = &[];

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    if current == 0 {
        tracing::info!(version = SCHEMA_VERSION, "creating database schema");
        conn.execute_batch(schema::SCHEMA_V1)?;
        insert_default_packages(conn)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        return Ok(());
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        let sql = UPGRADES
            .iter()
            .find(|(target, _)| *target == version)
            .map(|(_, sql)| *sql)
            .ok_or_else(|| DbError::Migration(format!("no upgrade to schema v{version}")))?;
        tracing::info!(version, "upgrading database schema");
        conn.execute_batch(&format!("BEGIN IMMEDIATE; {sql}; PRAGMA user_version = {version}; COMMIT;"))?;
    }
    Ok(())
}

/// Seed the coin package catalog. Admins edit it afterwards.
fn insert_default_packages(conn: &Connection) -> Result<()> {
    let defaults = [
        ("coins_100", "100 Coins", 100_i64, 0_i64, "0.99"),
        ("coins_500", "500 Coins", 500, 10, "4.99"),
        ("coins_1200", "1200 Coins", 1_200, 20, "9.99"),
        ("coins_2500", "2500 Coins", 2_500, 30, "19.99"),
    ];

    let mut stmt = conn
        .prepare(
            "INSERT OR IGNORE INTO coin_packages
             (id, name, coin_amount, bonus_percentage, base_price_usd, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0)",
        )?;
    for (id, name, coins, bonus, price) in &defaults {
        stmt.execute(rusqlite::params![id, name, coins, bonus, price])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        conn
    }

    #[test]
    fn test_fresh_migration() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_migration() {
        let conn = fresh();
        run(&conn).expect("first run");
        run(&conn).expect("second run should be no-op");
    }

    #[test]
    fn test_current_version_untouched() {
        let conn = fresh();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION).expect("set");
        run(&conn).expect("no-op");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |row| row.get(0))
            .expect("query");
        assert_eq!(count, 0, "an up-to-date database is not re-created");
    }

    #[test]
    fn test_newer_version_rejected() {
        let conn = fresh();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_default_packages() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM coin_packages WHERE is_active = 1", [], |row| {
                row.get(0)
            })
            .expect("query");
        assert_eq!(count, 4);
    }

    #[test]
    fn test_tables_created() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let expected_tables = [
            "coin_balances",
            "transactions",
            "coin_packages",
            "content_purchases",
            "subscriptions",
            "content_registry",
            "exchange_rates",
            "revenue_splits",
            "writer_earnings",
            "pool_runs",
            "pending_distributions",
            "payout_requests",
            "licensing_workflows",
        ];

        for table in &expected_tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("table check");
            assert_eq!(count, 1, "Table '{table}' should exist");
        }
    }
}
