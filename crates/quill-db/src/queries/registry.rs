//! Content ownership mirrored from the content service.

use quill_types::content::ContentType;
use quill_types::{ContentId, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::{parse_tag, parse_uuid, to_sql_u64, Result};

/// Record (or re-point) the writer and category of a content item.
pub fn upsert(
    conn: &Connection,
    content_id: &ContentId,
    writer_id: &UserId,
    content_type: ContentType,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO content_registry (content_id, writer_id, content_type, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(content_id) DO UPDATE SET
            writer_id = excluded.writer_id,
            content_type = excluded.content_type,
            updated_at = excluded.updated_at",
        rusqlite::params![
            content_id.to_string(),
            writer_id.to_string(),
            content_type.as_str(),
            to_sql_u64(now),
        ],
    )?;
    Ok(())
}

/// Writer and category of a content item, if registered.
pub fn get(conn: &Connection, content_id: &ContentId) -> Result<Option<(UserId, ContentType)>> {
    let row = conn
        .query_row(
            "SELECT writer_id, content_type FROM content_registry WHERE content_id = ?1",
            [content_id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    row.map(|(writer, kind)| Ok((parse_uuid(&writer)?, parse_tag::<ContentType>(&kind)?)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_register_content() {
        let conn = crate::open_memory().expect("open");
        let content = Uuid::new_v4();
        let writer = Uuid::new_v4();
        assert!(get(&conn, &content).expect("get").is_none());

        upsert(&conn, &content, &writer, ContentType::Story, 1).expect("upsert");
        assert_eq!(
            get(&conn, &content).expect("get"),
            Some((writer, ContentType::Story))
        );
    }
}
