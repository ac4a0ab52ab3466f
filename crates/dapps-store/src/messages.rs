use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;

use dapps_shared::types::is_local_destination;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str =
    "id, payload, timestamp, destination, extra_properties, forwarded, created_at";

impl Database {
    /// Store a message unless one with the same id already exists.
    ///
    /// Returns `true` when a new row was written.  An existing record is left
    /// untouched, including its `forwarded` flag.
    pub fn save_message(&self, message: &Message) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO messages
                 (id, payload, timestamp, destination, extra_properties, forwarded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.payload,
                message.timestamp,
                message.destination,
                serde_json::to_string(&message.extra_properties)?,
                message.forwarded,
                encode_time(&message.created_at),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_message(&self, id: &str) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All stored messages, oldest first.
    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages still waiting for delivery, excluding those addressed to
    /// `exclude_callsign` (this node) either bare or as `queue@callsign`.
    pub fn list_pending_outbound(&self, exclude_callsign: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE forwarded = 0
             ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let message = row?;
            if !is_local_destination(&message.destination, exclude_callsign) {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Flag a message as delivered.  Returns `false` if no such message exists.
    pub fn mark_forwarded(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("UPDATE messages SET forwarded = 1 WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

/// Fixed-width UTC encoding so stored times compare correctly as text.
pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn decode_properties(
    idx: usize,
    value: &str,
) -> rusqlite::Result<BTreeMap<String, String>> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let props_json: String = row.get(4)?;
    let created_str: String = row.get(6)?;

    Ok(Message {
        id: row.get(0)?,
        payload: row.get(1)?,
        timestamp: row.get(2)?,
        destination: row.get(3)?,
        extra_properties: decode_properties(4, &props_json)?,
        forwarded: row.get(5)?,
        created_at: decode_time(6, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn message(dest: &str, body: &str) -> Message {
        Message::compose(dest, body.as_bytes().to_vec(), Some(100_000_000), BTreeMap::new())
    }

    #[test]
    fn test_save_and_get_message() {
        let db = db();
        let mut msg = message("testqueue@gb7rdg", "hello world");
        msg.extra_properties.insert("prio".into(), "high".into());

        assert!(db.save_message(&msg).unwrap());
        let loaded = db.get_message("de75866").unwrap();
        assert_eq!(loaded.payload, b"hello world");
        assert_eq!(loaded.timestamp, Some(100_000_000));
        assert_eq!(loaded.extra_properties.get("prio").map(String::as_str), Some("high"));
        assert!(!loaded.forwarded);
    }

    #[test]
    fn test_get_missing_message_is_not_found() {
        assert!(matches!(db().get_message("0000000"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_save_is_insert_or_ignore() {
        let db = db();
        let msg = message("testqueue@gb7rdg", "hello world");
        assert!(db.save_message(&msg).unwrap());
        assert!(db.mark_forwarded(&msg.id).unwrap());

        // a repeat transfer must not resurrect a delivered message
        assert!(!db.save_message(&msg).unwrap());
        assert!(db.get_message(&msg.id).unwrap().forwarded);
        assert_eq!(db.list_messages().unwrap().len(), 1);
    }

    #[test]
    fn test_pending_excludes_local_and_forwarded() {
        let db = db();
        let remote = message("queue@SYS1", "one");
        let local_bare = message("n0call", "two");
        let local_queue = message("queue@N0CALL-3", "three");
        let done = message("queue@SYS2", "four");
        for m in [&remote, &local_bare, &local_queue, &done] {
            db.save_message(m).unwrap();
        }
        db.mark_forwarded(&done.id).unwrap();

        let pending = db.list_pending_outbound("N0CALL").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, remote.id);
    }

    #[test]
    fn test_mark_forwarded_unknown_id() {
        assert!(!db().mark_forwarded("abcdef0").unwrap());
    }
}
