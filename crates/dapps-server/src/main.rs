//! # dapps-server
//!
//! Store-and-forward relay for the DAPPS packet-radio messaging protocol.
//!
//! This binary provides:
//! - **DAPPSv1 listener** accepting inbound sessions from neighbouring nodes
//! - **Delivery sweeps** that forward pending messages through the local BPQ
//!   node's FBB port
//! - **REST API** (axum) for submitting messages and editing routes,
//!   neighbours and node options
//! - **Retention** of delivered messages according to a configurable policy

mod api;
mod client;
mod config;
mod delivery;
mod error;
mod gateway;
mod inbound;
mod listener;
mod retention;
mod routing;
mod transport;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dapps_store::{Database, SharedDatabase};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::delivery::DeliveryManager;
use crate::gateway::BpqGateway;
use crate::inbound::SessionSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dapps_server=debug")),
        )
        .init();

    info!("Starting DAPPS relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the store
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    // no session survives a restart, so neither do its offers
    let stale = db.clear_offers()?;
    if stale > 0 {
        info!(stale, "Discarded offers from a previous run");
    }

    let options = db.get_system_options()?;
    info!(
        callsign = %options.callsign,
        node = %options.node_host,
        fbb_port = options.fbb_port,
        "Node identity"
    );

    let store = SharedDatabase::new(db);

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let delivery = Arc::new(DeliveryManager::new(
        store.clone(),
        BpqGateway::new(config.response_timeout),
        config.compress_threshold,
    ));

    let app_state = AppState {
        store: store.clone(),
        delivery: delivery.clone(),
        config: Arc::new(config.clone()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic delivery sweep
    if let Some(every) = config.sweep_interval {
        let sweeper = delivery.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.run_sweep().await {
                    tracing::error!(error = %e, "Delivery sweep failed");
                }
            }
        });
    } else {
        info!("Automatic delivery sweeps disabled");
    }

    // Retention of forwarded messages
    tokio::spawn(retention::run(
        store.clone(),
        retention::policy_for(config.retention_days),
    ));

    // DAPPSv1 listener
    let settings = SessionSettings {
        max_payload_len: config.max_payload_len,
        idle_timeout: config.idle_timeout,
    };
    let tcp = listener::bind(config.listen_addr).await?;
    let listener_task = tokio::spawn(listener::run(tcp, store, settings, shutdown_rx));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // Stop accepting sessions and tell open ones to close
    let _ = shutdown_tx.send(true);
    match listener_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "DAPPS listener failed"),
        Err(e) => tracing::error!(error = %e, "DAPPS listener task panicked"),
        Ok(Ok(())) => {}
    }

    result
}
