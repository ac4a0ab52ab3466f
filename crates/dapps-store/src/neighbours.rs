use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Neighbour;

impl Database {
    /// Neighbour by exact callsign, ignoring case.
    pub fn get_neighbour(&self, callsign: &str) -> Result<Option<Neighbour>> {
        let neighbour = self
            .conn()
            .query_row(
                "SELECT callsign, connect_script FROM neighbours WHERE callsign = ?1",
                params![callsign],
                row_to_neighbour,
            )
            .optional()?;
        Ok(neighbour)
    }

    pub fn list_neighbours(&self) -> Result<Vec<Neighbour>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT callsign, connect_script FROM neighbours ORDER BY id")?;

        let rows = stmt.query_map([], row_to_neighbour)?;

        let mut neighbours = Vec::new();
        for row in rows {
            neighbours.push(row?);
        }
        Ok(neighbours)
    }

    pub fn upsert_neighbour(&self, neighbour: &Neighbour) -> Result<()> {
        self.conn().execute(
            "INSERT INTO neighbours (callsign, connect_script) VALUES (?1, ?2)
             ON CONFLICT(callsign) DO UPDATE SET connect_script = excluded.connect_script",
            params![neighbour.callsign, encode_script(&neighbour.connect_script)],
        )?;
        Ok(())
    }

    pub fn delete_neighbour(&self, callsign: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM neighbours WHERE callsign = ?1", params![callsign])?;
        Ok(affected > 0)
    }
}

fn encode_script(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| l.trim_end_matches(['\r', '\n']))
        .collect::<Vec<_>>()
        .join("\n")
}

fn row_to_neighbour(row: &rusqlite::Row<'_>) -> rusqlite::Result<Neighbour> {
    let script: String = row.get(1)?;
    Ok(Neighbour {
        callsign: row.get(0)?,
        connect_script: script
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_owned)
            .collect(),
    })
}
