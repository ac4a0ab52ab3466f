//! Client side of a DAPPSv1 session, used when delivering to a neighbour.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use dapps_shared::constants::PROMPT;
use dapps_shared::protocol::{data_line, QUIT};
use dapps_shared::{Offer, Reply};

use crate::error::DeliveryError;
use crate::transport::LineTransport;

/// Any byte stream a session can run over.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

/// How the peer answered an `ihave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    /// `error <id>`: this message is refused, the session carries on.
    Rejected,
}

/// How the peer answered a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    Acked,
    /// `bad <id>`: the peer could not verify the payload.
    Bad,
}

pub struct DappsClient {
    transport: LineTransport<Box<dyn SessionStream>>,
    response_timeout: Duration,
}

impl DappsClient {
    pub fn new(transport: LineTransport<Box<dyn SessionStream>>, response_timeout: Duration) -> Self {
        Self {
            transport,
            response_timeout,
        }
    }

    pub async fn await_prompt(&mut self) -> Result<(), DeliveryError> {
        self.transport
            .expect(self.response_timeout, |seen| {
                seen.ends_with(&format!("{PROMPT}\n")) || seen.ends_with(&format!("{PROMPT}\r"))
            })
            .await?;
        debug!("peer prompt received");
        Ok(())
    }

    pub async fn offer(&mut self, offer: &Offer) -> Result<OfferOutcome, DeliveryError> {
        self.transport.write_line(&offer.to_line()).await?;

        let line = self.next_reply_line().await?;
        match Reply::parse(&line) {
            Some(reply) if reply.accepts(&offer.id) => Ok(OfferOutcome::Accepted),
            Some(Reply::Error(id)) if id == offer.id || id.is_empty() => Ok(OfferOutcome::Rejected),
            _ => Err(DeliveryError::UnexpectedResponse {
                expected: format!("send {}", offer.id),
                got: line,
            }),
        }
    }

    /// Send `data <id>` followed by the payload, already encoded in the
    /// format the offer announced.
    pub async fn send_data(&mut self, id: &str, wire: &[u8]) -> Result<DataOutcome, DeliveryError> {
        self.transport.write_line(&data_line(id)).await?;
        self.transport.write_raw(wire).await?;

        let line = self.next_reply_line().await?;
        match Reply::parse(&line) {
            Some(Reply::Ack(acked)) if acked == id => Ok(DataOutcome::Acked),
            Some(Reply::Bad(bad)) if bad == id => Ok(DataOutcome::Bad),
            _ => Err(DeliveryError::UnexpectedResponse {
                expected: format!("ack {id}"),
                got: line,
            }),
        }
    }

    /// End the session.  The peer closes its side; failures are irrelevant by now.
    pub async fn quit(mut self) {
        if let Err(e) = self.transport.write_line(QUIT).await {
            debug!(error = %e, "quit not delivered");
        }
        if let Err(e) = self.transport.shutdown().await {
            debug!(error = %e, "error closing client stream");
        }
    }

    /// Next non-blank line, bounded by the response timeout.
    async fn next_reply_line(&mut self) -> Result<String, DeliveryError> {
        loop {
            let line = self.transport.read_line_within(self.response_timeout).await?;
            if !line.trim().is_empty() {
                return Ok(line.trim().to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dapps_shared::PayloadFormat;
    use tokio::io::{duplex, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn example_offer() -> Offer {
        Offer {
            id: "de75866".into(),
            length: 11,
            format: PayloadFormat::Plain,
            timestamp: Some(100_000_000),
            destination: "testqueue@gb7rdg".into(),
            extra_properties: Default::default(),
        }
    }

    /// Client over `stream`, already past the peer's prompt.
    async fn attach(stream: DuplexStream, timeout: Duration) -> DappsClient {
        let stream: Box<dyn SessionStream> = Box::new(stream);
        let mut client = DappsClient::new(LineTransport::new(stream), timeout);
        client.await_prompt().await.unwrap();
        client
    }

    async fn pair() -> (DappsClient, LineTransport<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let mut server = LineTransport::new(b);
        server.write_line(PROMPT).await.unwrap();
        let client = attach(a, TIMEOUT).await;
        (client, server)
    }

    #[tokio::test]
    async fn test_offer_accepted_then_acked() {
        let (mut client, mut server) = pair().await;

        let peer = tokio::spawn(async move {
            let line = server.read_line().await.unwrap().unwrap();
            assert!(line.starts_with("ihave de75866 len=11 fmt=p ts=100000000 dst=testqueue@gb7rdg chk="));
            server.write_line("").await.unwrap();
            server.write_line("send de75866").await.unwrap();

            assert_eq!(server.read_line().await.unwrap().as_deref(), Some("data de75866"));
            assert_eq!(server.read_payload(11, PayloadFormat::Plain, None).await.unwrap(), b"hello world");
            server.write_line("ack de75866").await.unwrap();

            assert_eq!(server.read_line().await.unwrap().as_deref(), Some("q"));
        });

        assert_eq!(client.offer(&example_offer()).await.unwrap(), OfferOutcome::Accepted);
        assert_eq!(
            client.send_data("de75866", b"hello world").await.unwrap(),
            DataOutcome::Acked
        );
        client.quit().await;
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_rejected() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            server.read_line().await.unwrap();
            server.write_line("error de75866").await.unwrap();
            // keep the stream open until the client is done
            server.read_line().await.ok();
        });

        assert_eq!(client.offer(&example_offer()).await.unwrap(), OfferOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_unexpected_reply() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            server.read_line().await.unwrap();
            server.write_line("?").await.unwrap();
            server.read_line().await.ok();
        });

        let err = client.offer(&example_offer()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_payload_reported_bad() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            server.read_line().await.unwrap();
            server.write_line("send de75866").await.unwrap();
            server.read_line().await.unwrap();
            server.read_payload(11, PayloadFormat::Plain, None).await.unwrap();
            server.write_line("bad de75866").await.unwrap();
            server.read_line().await.ok();
        });

        assert_eq!(client.offer(&example_offer()).await.unwrap(), OfferOutcome::Accepted);
        assert_eq!(
            client.send_data("de75866", b"hello world").await.unwrap(),
            DataOutcome::Bad
        );
    }

    #[tokio::test]
    async fn test_ack_for_other_id_is_unexpected() {
        let (mut client, mut server) = pair().await;
        tokio::spawn(async move {
            server.read_line().await.unwrap();
            server.write_line("send de75866").await.unwrap();
            server.read_line().await.unwrap();
            server.read_payload(11, PayloadFormat::Plain, None).await.unwrap();
            server.write_line("ack 1234567").await.unwrap();
            server.read_line().await.ok();
        });

        client.offer(&example_offer()).await.unwrap();
        let err = client.send_data("de75866", b"hello world").await.unwrap_err();
        assert!(matches!(err, DeliveryError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (a, b) = duplex(1024);
        let mut server = LineTransport::new(b);
        server.write_line(PROMPT).await.unwrap();
        let mut client = attach(a, Duration::from_millis(50)).await;

        let err = client.offer(&example_offer()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
        drop(server);
    }
}
