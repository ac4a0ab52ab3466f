use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::RouteHint;

impl Database {
    /// Hint for a destination system (or `*`), matched case-insensitively.
    pub fn get_route_hint(&self, system: &str) -> Result<Option<RouteHint>> {
        let hint = self
            .conn()
            .query_row(
                "SELECT destination, next_hop FROM route_hints WHERE destination = ?1",
                params![system],
                row_to_route_hint,
            )
            .optional()?;
        Ok(hint)
    }

    pub fn list_route_hints(&self) -> Result<Vec<RouteHint>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT destination, next_hop FROM route_hints ORDER BY destination")?;

        let rows = stmt.query_map([], row_to_route_hint)?;

        let mut hints = Vec::new();
        for row in rows {
            hints.push(row?);
        }
        Ok(hints)
    }

    /// Insert a hint, or repoint an existing one at a new next hop.
    pub fn upsert_route_hint(&self, hint: &RouteHint) -> Result<()> {
        self.conn().execute(
            "INSERT INTO route_hints (destination, next_hop) VALUES (?1, ?2)
             ON CONFLICT(destination) DO UPDATE SET next_hop = excluded.next_hop",
            params![hint.destination, hint.next_hop],
        )?;
        Ok(())
    }

    pub fn delete_route_hint(&self, system: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM route_hints WHERE destination = ?1", params![system])?;
        Ok(affected > 0)
    }
}

fn row_to_route_hint(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouteHint> {
    Ok(RouteHint {
        destination: row.get(0)?,
        next_hop: row.get(1)?,
    })
}
