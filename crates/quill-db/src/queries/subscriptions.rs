//! Subscription state mirrored from the user service.

use quill_types::content::{Subscription, SubscriptionTier};
use quill_types::UserId;
use rusqlite::{Connection, OptionalExtension};

use crate::{from_sql_u64, parse_tag, to_sql_u64, Result};

pub fn upsert(conn: &Connection, user_id: &UserId, sub: &Subscription, now: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (user_id, tier, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            tier = excluded.tier,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        rusqlite::params![
            user_id.to_string(),
            sub.tier.as_str(),
            to_sql_u64(sub.expires_at),
            to_sql_u64(now),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, user_id: &UserId) -> Result<Option<Subscription>> {
    let row = conn
        .query_row(
            "SELECT tier, expires_at FROM subscriptions WHERE user_id = ?1",
            [user_id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    row.map(|(tier, expires_at)| {
        Ok(Subscription {
            tier: parse_tag::<SubscriptionTier>(&tier)?,
            expires_at: from_sql_u64(expires_at),
        })
    })
    .transpose()
}
