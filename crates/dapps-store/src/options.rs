use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::SystemOptions;

const NODE_HOST: &str = "NodeHost";
const FBB_PORT: &str = "FbbPort";
const FBB_USER: &str = "FbbUser";
const FBB_PASSWORD: &str = "FbbPassword";
const CALLSIGN: &str = "Callsign";

impl Database {
    /// Read the node options, falling back to defaults for any missing row.
    pub fn get_system_options(&self) -> Result<SystemOptions> {
        let mut options = SystemOptions::default();

        let mut stmt = self.conn().prepare("SELECT option, value FROM system_options")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (option, value) = row?;
            match option.to_ascii_lowercase().as_str() {
                "nodehost" => options.node_host = value,
                "fbbport" => {
                    options.fbb_port = value
                        .trim()
                        .parse()
                        .map_err(|_| StoreError::InvalidOption { option, value })?;
                }
                "fbbuser" => options.fbb_user = value,
                "fbbpassword" => options.fbb_password = value,
                "callsign" => options.callsign = value,
                _ => tracing::debug!(option = %option, "ignoring unknown system option"),
            }
        }

        Ok(options)
    }

    pub fn save_system_options(&self, options: &SystemOptions) -> Result<()> {
        let fbb_port = options.fbb_port.to_string();
        let pairs = [
            (NODE_HOST, options.node_host.as_str()),
            (FBB_PORT, fbb_port.as_str()),
            (FBB_USER, options.fbb_user.as_str()),
            (FBB_PASSWORD, options.fbb_password.as_str()),
            (CALLSIGN, options.callsign.as_str()),
        ];

        let mut stmt = self.conn().prepare(
            "INSERT INTO system_options (option, value) VALUES (?1, ?2)
             ON CONFLICT(option) DO UPDATE SET value = excluded.value",
        )?;
        for (option, value) in pairs {
            stmt.execute(params![option, value])?;
        }
        Ok(())
    }
}
