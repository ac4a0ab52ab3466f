use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use dapps_store::SharedDatabase;

use crate::inbound::{InboundSession, SessionSettings};

/// Accept DAPPS connections until `shutdown` flips to `true`.  Each
/// connection gets its own task; the listener does not wait for them.
pub async fn run(
    listener: TcpListener,
    store: SharedDatabase,
    settings: SessionSettings,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "DAPPS listener accepting connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };
                spawn_session(stream, addr, store.clone(), settings, shutdown.clone());
            }
            _ = shutdown.changed() => {
                info!("DAPPS listener stopping");
                return Ok(());
            }
        }
    }
}

pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

fn spawn_session(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    store: SharedDatabase,
    settings: SessionSettings,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %addr, error = %e, "could not disable Nagle");
    }
    info!(peer = %addr, "accepted connection");
    let session = InboundSession::new(stream, store, settings, addr.to_string());
    tokio::spawn(session.run(shutdown));
}

#[cfg(test)]
mod tests {
    use super::*;
    use dapps_shared::constants::PROMPT;
    use dapps_store::Database;
    use tokio::net::TcpStream;

    use crate::transport::LineTransport;

    #[tokio::test]
    async fn test_serves_sessions_over_tcp() {
        let store = SharedDatabase::new(Database::open_in_memory().unwrap());
        let listener = bind(([127, 0, 0, 1], 0).into()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(run(listener, store, SessionSettings::default(), rx));

        let mut client = LineTransport::new(TcpStream::connect(addr).await.unwrap());
        client.write_line("M0LTE").await.unwrap();
        assert_eq!(client.read_line().await.unwrap().as_deref(), Some(PROMPT));

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        // the open session is told to stop too
        assert_eq!(client.read_line().await.unwrap(), None);
    }
}
