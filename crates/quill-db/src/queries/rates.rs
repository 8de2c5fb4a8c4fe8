//! Exchange rate snapshots pushed by the external rate feed.

use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::{from_sql_u64, parse_decimal, to_sql_u64, Result};

/// Store the latest USD value of one unit of `currency`.
pub fn upsert(conn: &Connection, currency: &str, usd_per_unit: Decimal, observed_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO exchange_rates (currency, usd_per_unit, observed_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(currency) DO UPDATE SET
            usd_per_unit = excluded.usd_per_unit,
            observed_at = excluded.observed_at",
        rusqlite::params![currency, usd_per_unit.to_string(), to_sql_u64(observed_at)],
    )?;
    Ok(())
}

/// Latest stored rate and its observation time.
pub fn get(conn: &Connection, currency: &str) -> Result<Option<(Decimal, u64)>> {
    let row = conn
        .query_row(
            "SELECT usd_per_unit, observed_at FROM exchange_rates WHERE currency = ?1",
            [currency],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    row.map(|(rate, at)| Ok((parse_decimal(&rate)?, from_sql_u64(at))))
        .transpose()
}
