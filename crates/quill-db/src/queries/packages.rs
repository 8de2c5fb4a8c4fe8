//! Coin package catalog query functions.

use quill_types::ledger::CoinPackage;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{parse_decimal, to_sql_u64, Result};

/// Insert or replace a package.
pub fn upsert(conn: &Connection, package: &CoinPackage, now: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO coin_packages
         (id, name, coin_amount, bonus_percentage, base_price_usd, is_active, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            coin_amount = excluded.coin_amount,
            bonus_percentage = excluded.bonus_percentage,
            base_price_usd = excluded.base_price_usd,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at",
        rusqlite::params![
            package.id,
            package.name,
            to_sql_u64(package.coin_amount),
            i64::from(package.bonus_percentage),
            package.base_price_usd.to_string(),
            package.is_active,
            to_sql_u64(now),
        ],
    )?;
    Ok(())
}

/// Get a package by id, active or not.
pub fn get(conn: &Connection, id: &str) -> Result<Option<CoinPackage>> {
    let raw = conn
        .query_row(
            "SELECT id, name, coin_amount, bonus_percentage, base_price_usd, is_active
             FROM coin_packages WHERE id = ?1",
            [id],
            RawPackage::from_row,
        )
        .optional()?;
    raw.map(RawPackage::into_package).transpose()
}

/// List packages, cheapest first.
pub fn list(conn: &Connection, active_only: bool) -> Result<Vec<CoinPackage>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, coin_amount, bonus_percentage, base_price_usd, is_active
         FROM coin_packages WHERE is_active = 1 OR ?1 = 0
         ORDER BY coin_amount",
    )?;
    let raws = stmt
        .query_map([active_only], RawPackage::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawPackage::into_package).collect()
}

struct RawPackage {
    id: String,
    name: String,
    coin_amount: i64,
    bonus_percentage: i64,
    base_price_usd: String,
    is_active: bool,
}

impl RawPackage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            coin_amount: row.get(2)?,
            bonus_percentage: row.get(3)?,
            base_price_usd: row.get(4)?,
            is_active: row.get(5)?,
        })
    }

    fn into_package(self) -> Result<CoinPackage> {
        Ok(CoinPackage {
            id: self.id,
            name: self.name,
            coin_amount: u64::try_from(self.coin_amount).unwrap_or(0),
            bonus_percentage: u8::try_from(self.bonus_percentage).unwrap_or(0),
            base_price_usd: parse_decimal(&self.base_price_usd)?,
            is_active: self.is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_seeded_catalog() {
        let conn = test_db();
        let packages = list(&conn, true).expect("list");
        assert_eq!(packages.len(), 4);
        assert_eq!(packages[0].id, "coins_100");
        assert_eq!(packages[1].total_coins(), 550);
    }

    #[test]
    fn test_upsert_and_deactivate() {
        let conn = test_db();
        let mut pkg = CoinPackage {
            id: "promo".into(),
            name: "Promo".into(),
            coin_amount: 300,
            bonus_percentage: 50,
            base_price_usd: Decimal::new(299, 2),
            is_active: true,
        };
        upsert(&conn, &pkg, 1).expect("insert");
        assert_eq!(get(&conn, "promo").expect("get"), Some(pkg.clone()));

        pkg.is_active = false;
        upsert(&conn, &pkg, 2).expect("update");
        assert_eq!(list(&conn, true).expect("list").len(), 4);
        assert_eq!(list(&conn, false).expect("list").len(), 5);
    }
}
