//! Reaching a neighbour through the local packet node.
//!
//! [`BpqGateway`] logs in to the node's FBB telnet port, replays the
//! neighbour's connect script and hands back a [`DappsClient`] sitting at the
//! remote DAPPS prompt.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info};

use dapps_store::{Neighbour, SystemOptions};

use crate::client::{DappsClient, SessionStream};
use crate::error::DeliveryError;
use crate::transport::LineTransport;

/// Produces a connected client for a neighbour.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(
        &self,
        neighbour: &Neighbour,
        options: &SystemOptions,
    ) -> Result<DappsClient, DeliveryError>;
}

/// One parsed connect-script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Pause(Duration),
    /// A line sent to the node; connect commands wait for the link to come up.
    Send { line: String, await_link: bool },
}

/// Parse a stored connect script.  Blank lines are skipped and lines sent to
/// the node are upper-cased, as node commands are.
pub fn parse_script(lines: &[String]) -> Result<Vec<ScriptStep>, DeliveryError> {
    let mut steps = Vec::with_capacity(lines.len());
    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_uppercase();

        if keyword == "PAUSE" {
            let ms = match (words.next(), words.next()) {
                (Some(ms), None) => ms.parse::<u64>().ok(),
                _ => None,
            }
            .ok_or_else(|| DeliveryError::Script {
                line: line.to_string(),
                reason: "PAUSE takes one whole number of milliseconds".into(),
            })?;
            steps.push(ScriptStep::Pause(Duration::from_millis(ms)));
        } else {
            let await_link = matches!(keyword.as_str(), "C" | "NC" | "CONNECT") && words.next().is_some();
            steps.push(ScriptStep::Send {
                line: line.to_ascii_uppercase(),
                await_link,
            });
        }
    }
    Ok(steps)
}

/// Gateway through a BPQ32/LinBPQ node's FBB port.
pub struct BpqGateway {
    response_timeout: Duration,
}

impl BpqGateway {
    pub fn new(response_timeout: Duration) -> Self {
        Self { response_timeout }
    }

    async fn login(
        &self,
        transport: &mut LineTransport<Box<dyn SessionStream>>,
        options: &SystemOptions,
    ) -> Result<(), DeliveryError> {
        let credentials = format!("{}\r{}\rBPQTERMTCP\r", options.fbb_user, options.fbb_password);
        transport.write_raw(credentials.as_bytes()).await?;

        transport
            .expect(self.response_timeout, |seen| {
                seen.ends_with("Connected to TelnetServer\r")
            })
            .await
            .map_err(|e| DeliveryError::Login(e.to_string()))?;
        Ok(())
    }

    async fn run_script(
        &self,
        transport: &mut LineTransport<Box<dyn SessionStream>>,
        steps: &[ScriptStep],
    ) -> Result<(), DeliveryError> {
        for step in steps {
            match step {
                ScriptStep::Pause(delay) => tokio::time::sleep(*delay).await,
                ScriptStep::Send { line, await_link } => {
                    debug!(line = %line, "connect script");
                    transport.write_raw(format!("{line}\r").as_bytes()).await?;
                    if *await_link {
                        transport
                            .expect(self.response_timeout, |seen| {
                                seen.to_ascii_lowercase().contains("connected to")
                            })
                            .await
                            .map_err(|e| DeliveryError::Script {
                                line: line.clone(),
                                reason: e.to_string(),
                            })?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for BpqGateway {
    async fn connect(
        &self,
        neighbour: &Neighbour,
        options: &SystemOptions,
    ) -> Result<DappsClient, DeliveryError> {
        let steps = parse_script(&neighbour.connect_script)?;

        let addr = (options.node_host.as_str(), options.fbb_port);
        let stream = tokio::time::timeout(self.response_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DeliveryError::Timeout(self.response_timeout))??;
        let stream: Box<dyn SessionStream> = Box::new(stream);
        let mut transport = LineTransport::new(stream);

        self.login(&mut transport, options).await?;
        info!(
            node = %options.node_host,
            port = options.fbb_port,
            neighbour = %neighbour.callsign,
            "logged in to node, running connect script"
        );

        self.run_script(&mut transport, &steps).await?;

        let mut client = DappsClient::new(transport, self.response_timeout);
        client.await_prompt().await?;
        Ok(client)
    }
}
