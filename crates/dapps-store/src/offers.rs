use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use dapps_shared::{Offer, PayloadFormat};

use crate::database::Database;
use crate::error::Result;
use crate::messages::{decode_properties, encode_time};

impl Database {
    /// Record an `ihave` accepted by `session`.  A repeated offer for the same
    /// id within that session replaces the earlier one; other sessions holding
    /// the same id are untouched.
    pub fn save_offer(&self, session: &str, offer: &Offer) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO offers
                 (session, id, length, format, timestamp, destination, extra_properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session,
                offer.id,
                offer.length as i64,
                offer.format.code(),
                offer.timestamp,
                offer.destination,
                serde_json::to_string(&offer.extra_properties)?,
                encode_time(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn load_offer(&self, session: &str, id: &str) -> Result<Option<Offer>> {
        let offer = self
            .conn()
            .query_row(
                "SELECT id, length, format, timestamp, destination, extra_properties
                 FROM offers WHERE session = ?1 AND id = ?2",
                params![session, id],
                row_to_offer,
            )
            .optional()?;
        Ok(offer)
    }

    pub fn delete_offer(&self, session: &str, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM offers WHERE session = ?1 AND id = ?2",
            params![session, id],
        )?;
        Ok(affected > 0)
    }

    /// Drop whatever `session` left unfinished.
    pub fn delete_session_offers(&self, session: &str) -> Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM offers WHERE session = ?1", params![session])?)
    }

    /// Drop every stored offer.  Run at startup: no session survives a restart.
    pub fn clear_offers(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM offers", [])?)
    }
}

fn row_to_offer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Offer> {
    let length: i64 = row.get(1)?;
    let format_code: String = row.get(2)?;
    let props_json: String = row.get(5)?;

    let length = usize::try_from(length).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    let format = PayloadFormat::from_code(&format_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown payload format '{format_code}'").into(),
        )
    })?;

    Ok(Offer {
        id: row.get(0)?,
        length,
        format,
        timestamp: row.get(3)?,
        destination: row.get(4)?,
        extra_properties: decode_properties(5, &props_json)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn offer(id: &str) -> Offer {
        let mut extra_properties = BTreeMap::new();
        extra_properties.insert("from".to_string(), "M0LTE".to_string());
        Offer {
            id: id.into(),
            length: 11,
            format: PayloadFormat::Deflate,
            timestamp: Some(100_000_000),
            destination: "testqueue@gb7rdg".into(),
            extra_properties,
        }
    }

    #[test]
    fn test_save_load_delete() {
        let db = Database::open_in_memory().unwrap();
        db.save_offer("s1", &offer("de75866")).unwrap();

        let loaded = db.load_offer("s1", "de75866").unwrap().expect("offer stored");
        assert_eq!(loaded, offer("de75866"));

        assert!(db.delete_offer("s1", "de75866").unwrap());
        assert!(db.load_offer("s1", "de75866").unwrap().is_none());
        assert!(!db.delete_offer("s1", "de75866").unwrap());
    }

    #[test]
    fn test_reoffer_replaces() {
        let db = Database::open_in_memory().unwrap();
        db.save_offer("s1", &offer("de75866")).unwrap();
        let mut again = offer("de75866");
        again.format = PayloadFormat::Plain;
        db.save_offer("s1", &again).unwrap();

        let loaded = db.load_offer("s1", "de75866").unwrap().unwrap();
        assert_eq!(loaded.format, PayloadFormat::Plain);
    }

    #[test]
    fn test_offers_are_scoped_to_session() {
        let db = Database::open_in_memory().unwrap();
        db.save_offer("s1", &offer("de75866")).unwrap();
        let mut other = offer("de75866");
        other.format = PayloadFormat::Plain;
        other.length = 42;
        db.save_offer("s2", &other).unwrap();

        // neither session sees the other's framing
        assert_eq!(db.load_offer("s1", "de75866").unwrap().unwrap(), offer("de75866"));
        assert_eq!(db.load_offer("s2", "de75866").unwrap().unwrap().length, 42);
        assert!(db.load_offer("s3", "de75866").unwrap().is_none());

        assert_eq!(db.delete_session_offers("s1").unwrap(), 1);
        assert!(db.load_offer("s1", "de75866").unwrap().is_none());
        assert_eq!(db.load_offer("s2", "de75866").unwrap().unwrap(), other);
    }

    #[test]
    fn test_clear_offers_removes_all() {
        let db = Database::open_in_memory().unwrap();
        db.save_offer("s1", &offer("1111111")).unwrap();
        db.save_offer("s2", &offer("2222222")).unwrap();
        assert_eq!(db.clear_offers().unwrap(), 2);
        assert!(db.load_offer("s1", "1111111").unwrap().is_none());
    }
}
