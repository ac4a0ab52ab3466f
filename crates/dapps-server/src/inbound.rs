//! Server side of a DAPPSv1 session.
//!
//! Each accepted connection runs one [`InboundSession`] as an explicit state
//! machine.  The session owns its transport, and the offers it accepts are
//! stored under its own token so concurrent sessions never see each other's.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dapps_shared::constants::{DEFAULT_MAX_PAYLOAD_LEN, HELP_TEXT, PROMPT, UNKNOWN_COMMAND_REPLY};
use dapps_shared::fingerprint::compute_id;
use dapps_shared::protocol::offered_id;
use dapps_shared::{Command, Offer, ProtocolError, Reply};
use dapps_store::{Message, SharedDatabase};

use crate::transport::LineTransport;

/// Limits applied to every inbound session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_payload_len: usize,
    /// Close the session after this long without input.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            idle_timeout: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerQuit,
    PeerHungUp,
    IdleTimeout,
    Shutdown,
    /// A compressed payload could not be decoded; the stream is out of sync.
    CorruptPayload,
    Transport(String),
}

#[derive(Debug)]
enum SessionState {
    AwaitGreeting,
    Ready,
    Idle,
    HandlingOffer(String),
    HandlingData(String),
    Closed(CloseReason),
}

pub struct InboundSession<S> {
    transport: LineTransport<S>,
    store: SharedDatabase,
    settings: SessionSettings,
    peer: String,
    /// Scopes this session's rows in the offers table.
    token: String,
}

impl<S> InboundSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: SharedDatabase, settings: SessionSettings, peer: impl Into<String>) -> Self {
        Self {
            transport: LineTransport::new(stream),
            store,
            settings,
            peer: peer.into(),
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Drive the session to completion.  Never fails: every outcome is a
    /// [`CloseReason`].
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> CloseReason {
        let mut state = SessionState::AwaitGreeting;

        let reason = loop {
            if *shutdown.borrow() {
                break CloseReason::Shutdown;
            }

            state = match state {
                SessionState::Closed(reason) => break reason,
                current => {
                    tokio::select! {
                        next = self.step(current) => next,
                        _ = shutdown.changed() => SessionState::Closed(CloseReason::Shutdown),
                    }
                }
            };
        };

        self.discard_leftover_offers();
        if let Err(e) = self.transport.shutdown().await {
            debug!(peer = %self.peer, error = %e, "error closing session stream");
        }
        info!(peer = %self.peer, reason = ?reason, "session closed");
        reason
    }

    async fn step(&mut self, state: SessionState) -> SessionState {
        let result = match state {
            SessionState::AwaitGreeting => self.await_greeting().await,
            SessionState::Ready => self.send_prompt().await,
            SessionState::Idle => self.idle().await,
            SessionState::HandlingOffer(line) => self.handle_offer(&line).await,
            SessionState::HandlingData(id) => self.handle_data(&id).await,
            SessionState::Closed(reason) => Err(reason),
        };
        result.unwrap_or_else(SessionState::Closed)
    }

    async fn await_greeting(&mut self) -> Result<SessionState, CloseReason> {
        let callsign = self.next_line().await?;
        info!(
            peer = %self.peer,
            session = %self.token,
            callsign = %callsign.trim(),
            "inbound session started"
        );
        Ok(SessionState::Ready)
    }

    async fn send_prompt(&mut self) -> Result<SessionState, CloseReason> {
        self.send(PROMPT).await?;
        Ok(SessionState::Idle)
    }

    async fn idle(&mut self) -> Result<SessionState, CloseReason> {
        let line = self.next_line().await?;

        match Command::parse(&line) {
            Command::Quit => Err(CloseReason::PeerQuit),
            Command::Help => {
                self.send(HELP_TEXT).await?;
                Ok(SessionState::Idle)
            }
            Command::IHave(line) => Ok(SessionState::HandlingOffer(line)),
            Command::Data(id) => Ok(SessionState::HandlingData(id)),
            Command::Unknown(line) => {
                debug!(peer = %self.peer, line = %line, "unknown command");
                self.send(UNKNOWN_COMMAND_REPLY).await?;
                Ok(SessionState::Idle)
            }
        }
    }

    async fn handle_offer(&mut self, line: &str) -> Result<SessionState, CloseReason> {
        let id = offered_id(line).to_string();

        let offer = match Offer::parse(line, self.settings.max_payload_len) {
            Ok(offer) => offer,
            Err(e) => {
                warn!(peer = %self.peer, id = %id, error = %e, "rejecting offer");
                self.send(&Reply::Error(id).to_line()).await?;
                return Ok(SessionState::Idle);
            }
        };

        if offer.timestamp.is_none() {
            debug!(id = %offer.id, "offer carries no timestamp; duplicate detection is weaker");
        }

        if let Err(e) = self.store.with(|db| db.save_offer(&self.token, &offer)) {
            warn!(id = %offer.id, error = %e, "failed to store offer");
            self.send(&Reply::Error(id).to_line()).await?;
            return Ok(SessionState::Idle);
        }

        debug!(
            peer = %self.peer,
            id = %offer.id,
            len = offer.length,
            fmt = %offer.format,
            dst = %offer.destination,
            "offer accepted"
        );
        self.send(&Reply::Send(vec![offer.id]).to_line()).await?;
        Ok(SessionState::Idle)
    }

    async fn handle_data(&mut self, id: &str) -> Result<SessionState, CloseReason> {
        let offer = self
            .store
            .with(|db| db.load_offer(&self.token, id))
            .unwrap_or_else(|e| {
                warn!(id = %id, error = %e, "failed to load offer");
                None
            });

        let Some(offer) = offer else {
            warn!(peer = %self.peer, id = %id, "data for an id not offered in this session");
            self.send(&Reply::Error(id.to_string()).to_line()).await?;
            return Ok(SessionState::Idle);
        };

        let idle = self.settings.idle_timeout;
        let payload = match self.transport.read_payload(offer.length, offer.format, idle).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(peer = %self.peer, id = %id, error = %e, "undecodable payload");
                self.forget_offer(id);
                self.send(&Reply::Bad(id.to_string()).to_line()).await?;
                return Err(CloseReason::CorruptPayload);
            }
            Err(e) => return Err(transport_closed(e)),
        };

        let computed = compute_id(&payload, offer.timestamp);
        if computed != offer.id {
            let e = ProtocolError::IntegrityMismatch {
                id: offer.id.clone(),
                computed,
            };
            warn!(peer = %self.peer, error = %e, "payload failed verification");
            self.forget_offer(id);
            self.send(&Reply::Bad(id.to_string()).to_line()).await?;
            return Ok(SessionState::Idle);
        }

        let message = Message::from_offer(&offer, payload);
        let reply = match self.store.with(|db| db.save_message(&message)) {
            Ok(stored) => {
                if stored {
                    info!(id = %message.id, dst = %message.destination, "message received");
                } else {
                    debug!(id = %message.id, "message already held");
                }
                self.forget_offer(id);
                Reply::Ack(id.to_string())
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "failed to store message");
                Reply::Error(id.to_string())
            }
        };

        self.send(&reply.to_line()).await?;
        Ok(SessionState::Idle)
    }

    async fn next_line(&mut self) -> Result<String, CloseReason> {
        let read = self.transport.read_line();
        match with_idle_timeout(self.settings.idle_timeout, read).await? {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(CloseReason::PeerHungUp),
            Err(e) => Err(transport_closed(e)),
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), CloseReason> {
        self.transport.write_line(line).await.map_err(transport_closed)
    }

    fn forget_offer(&self, id: &str) {
        if let Err(e) = self.store.with(|db| db.delete_offer(&self.token, id)) {
            warn!(id = %id, error = %e, "failed to delete offer");
        }
    }

    fn discard_leftover_offers(&self) {
        match self.store.with(|db| db.delete_session_offers(&self.token)) {
            Ok(0) => {}
            Ok(n) => debug!(peer = %self.peer, discarded = n, "discarded unfinished offers"),
            Err(e) => warn!(session = %self.token, error = %e, "failed to delete offers"),
        }
    }
}

async fn with_idle_timeout<T>(
    idle: Option<Duration>,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<io::Result<T>, CloseReason> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| CloseReason::IdleTimeout),
        None => Ok(fut.await),
    }
}

fn transport_closed(e: io::Error) -> CloseReason {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            CloseReason::PeerHungUp
        }
        io::ErrorKind::TimedOut => CloseReason::IdleTimeout,
        _ => CloseReason::Transport(e.to_string()),
    }
}
