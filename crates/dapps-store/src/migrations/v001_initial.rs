//! v001 -- Initial schema creation.
//!
//! Creates the five relay tables: `messages`, `offers`, `route_hints`,
//! `neighbours`, and `system_options`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages (local submissions and verified inbound transfers)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY NOT NULL,   -- 7-char fingerprint
    payload          BLOB NOT NULL,
    timestamp        INTEGER,                     -- epoch ms, nullable
    destination      TEXT NOT NULL,               -- callsign or queue@system
    extra_properties TEXT NOT NULL DEFAULT '{}',  -- JSON object
    forwarded        INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at       TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_forwarded ON messages(forwarded);

-- ----------------------------------------------------------------
-- Offers (in-flight inbound transfers)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS offers (
    id               TEXT PRIMARY KEY NOT NULL,
    length           INTEGER NOT NULL,
    format           TEXT NOT NULL,               -- 'p' or 'd'
    timestamp        INTEGER,
    destination      TEXT NOT NULL,
    extra_properties TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Routing
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS route_hints (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    destination TEXT NOT NULL UNIQUE COLLATE NOCASE,  -- system name or '*'
    next_hop    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS neighbours (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    callsign       TEXT NOT NULL UNIQUE COLLATE NOCASE,
    connect_script TEXT NOT NULL DEFAULT ''           -- newline separated
);

-- ----------------------------------------------------------------
-- Node identity and gateway credentials
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS system_options (
    option TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
    value  TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
