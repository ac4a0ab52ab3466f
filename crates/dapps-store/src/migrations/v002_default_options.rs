use rusqlite::Connection;

// Existing values win; only missing options are seeded.
const UP_SQL: &str = r#"
INSERT OR IGNORE INTO system_options (option, value) VALUES ('NodeHost', 'localhost');
INSERT OR IGNORE INTO system_options (option, value) VALUES ('FbbPort', '8011');
INSERT OR IGNORE INTO system_options (option, value) VALUES ('FbbUser', 'telnetportuser');
INSERT OR IGNORE INTO system_options (option, value) VALUES ('FbbPassword', 'telnetportpassword');
INSERT OR IGNORE INTO system_options (option, value) VALUES ('Callsign', 'N0CALL');
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
