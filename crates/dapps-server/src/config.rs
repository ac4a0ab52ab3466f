//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration.  Node identity and gateway credentials are not here: they
//! live in the `system_options` table and are edited through the API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dapps_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_LISTEN_PORT, DEFAULT_MAX_PAYLOAD_LEN};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the DAPPS session listener binds to.
    /// Env: `DAPPS_LISTEN_ADDR`
    /// Default: `0.0.0.0:11000`
    pub listen_addr: SocketAddr,

    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DAPPS_DB_PATH`
    /// Default: `None` (platform data directory).
    pub db_path: Option<PathBuf>,

    /// Time between automatic delivery sweeps; `None` disables them.
    /// Env: `SWEEP_INTERVAL_SECS` (0 disables)
    /// Default: 300 s
    pub sweep_interval: Option<Duration>,

    /// Bound on every wait for a peer or gateway reply during delivery.
    /// Env: `RESPONSE_TIMEOUT_SECS`
    /// Default: 30 s
    pub response_timeout: Duration,

    /// Inbound sessions silent for this long are closed; `None` waits forever.
    /// Env: `IDLE_TIMEOUT_SECS` (0 disables)
    /// Default: 600 s
    pub idle_timeout: Option<Duration>,

    /// Largest decompressed payload accepted in an offer.
    /// Env: `MAX_PAYLOAD_LEN`
    /// Default: 1 MiB
    pub max_payload_len: usize,

    /// Outbound payloads of at least this many bytes are offered deflated;
    /// `None` always sends plain.
    /// Env: `COMPRESS_THRESHOLD` (0 disables)
    /// Default: 256
    pub compress_threshold: Option<usize>,

    /// Forwarded messages older than this are purged; `None` keeps them.
    /// Env: `RETENTION_DAYS` (0 keeps forever)
    /// Default: `None`
    pub retention_days: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_LISTEN_PORT).into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: None,
            sweep_interval: Some(Duration::from_secs(300)),
            response_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            compress_threshold: Some(256),
            retention_days: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "DAPPS_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(addr) = parse_var(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DAPPS_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "SWEEP_INTERVAL_SECS") {
            config.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "RESPONSE_TIMEOUT_SECS") {
            if secs > 0 {
                config.response_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("RESPONSE_TIMEOUT_SECS must be positive, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "IDLE_TIMEOUT_SECS") {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(len) = parse_var::<usize>(&lookup, "MAX_PAYLOAD_LEN") {
            if len > 0 {
                config.max_payload_len = len;
            } else {
                tracing::warn!("MAX_PAYLOAD_LEN must be positive, using default");
            }
        }

        if let Some(threshold) = parse_var::<usize>(&lookup, "COMPRESS_THRESHOLD") {
            config.compress_threshold = (threshold > 0).then_some(threshold);
        }

        if let Some(days) = parse_var::<u32>(&lookup, "RETENTION_DAYS") {
            config.retention_days = (days > 0).then_some(days);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {key}, using default");
            None
        }
    }
}
