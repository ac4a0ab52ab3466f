//! v003 -- Scope offers to the session that accepted them.
//!
//! Offers never outlive a session, so the table is rebuilt rather than
//! migrated row by row.

use rusqlite::Connection;

const UP_SQL: &str = r#"
DROP TABLE IF EXISTS offers;

CREATE TABLE offers (
    session          TEXT NOT NULL,               -- inbound session token
    id               TEXT NOT NULL,
    length           INTEGER NOT NULL,
    format           TEXT NOT NULL,               -- 'p' or 'd'
    timestamp        INTEGER,
    destination      TEXT NOT NULL,
    extra_properties TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,
    PRIMARY KEY (session, id)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
