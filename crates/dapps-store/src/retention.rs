//! Pluggable clean-up of delivered messages.
//!
//! The relay never deletes a message on its own.  A [`RetentionPolicy`]
//! decides how long forwarded messages are kept; pending ones are never
//! touched.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::messages::encode_time;

pub trait RetentionPolicy: Send + Sync {
    /// Forwarded messages stored before the returned instant may be deleted.
    /// `None` keeps everything.
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Keep every message forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepForever;

impl RetentionPolicy for KeepForever {
    fn cutoff(&self, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        None
    }
}

/// Delete forwarded messages once they are older than a fixed age.
#[derive(Debug, Clone, Copy)]
pub struct PurgeForwardedAfter(pub Duration);

impl RetentionPolicy for PurgeForwardedAfter {
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.0)
    }
}

impl Database {
    /// Apply `policy`, returning the number of messages removed.
    pub fn apply_retention(&self, policy: &dyn RetentionPolicy) -> Result<usize> {
        let Some(cutoff) = policy.cutoff(Utc::now()) else {
            return Ok(0);
        };

        let removed = self.conn().execute(
            "DELETE FROM messages WHERE forwarded = 1 AND created_at < ?1",
            params![encode_time(&cutoff)],
        )?;

        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "purged forwarded messages");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::Message;

    fn aged(db: &Database, body: &str, days: i64, forwarded: bool) -> String {
        let mut msg = Message::compose("q@SYS1", body.as_bytes().to_vec(), None, BTreeMap::new());
        msg.created_at = Utc::now() - Duration::days(days);
        msg.forwarded = forwarded;
        db.save_message(&msg).unwrap();
        msg.id
    }

    #[test]
    fn test_keep_forever_deletes_nothing() {
        let db = Database::open_in_memory().unwrap();
        aged(&db, "old", 400, true);
        assert_eq!(db.apply_retention(&KeepForever).unwrap(), 0);
        assert_eq!(db.list_messages().unwrap().len(), 1);
    }

    #[test]
    fn test_purge_only_old_forwarded() {
        let db = Database::open_in_memory().unwrap();
        let old_done = aged(&db, "a", 10, true);
        let old_pending = aged(&db, "b", 10, false);
        let new_done = aged(&db, "c", 1, true);

        let removed = db
            .apply_retention(&PurgeForwardedAfter(Duration::days(7)))
            .unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<String> = db.list_messages().unwrap().into_iter().map(|m| m.id).collect();
        assert!(!remaining.contains(&old_done));
        assert!(remaining.contains(&old_pending));
        assert!(remaining.contains(&new_done));
    }
}
