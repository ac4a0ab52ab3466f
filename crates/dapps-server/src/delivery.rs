//! Outbound delivery sweeps.
//!
//! A sweep snapshots the pending messages and routing tables, groups the
//! messages by next hop and plays the client side of the protocol against
//! each neighbour in turn.  A message is only marked forwarded after the
//! neighbour acknowledges it; every failure leaves it pending.

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dapps_store::{Message, Neighbour, SharedDatabase, SystemOptions};

use crate::client::{DappsClient, DataOutcome, OfferOutcome};
use crate::error::{DeliveryError, RoutingError};
use crate::gateway::Gateway;
use crate::routing::RoutingTable;
use crate::transport::encode_payload;

/// Counts for one sweep, returned by the `dorun` endpoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Messages waiting at the start of the sweep.
    pub pending: usize,
    pub forwarded: usize,
    /// Offers the neighbour answered with `error`.
    pub rejected: usize,
    /// Payloads the neighbour answered with `bad`.
    pub bad: usize,
    pub unroutable: usize,
    /// Messages not attempted because their neighbour failed earlier.
    pub deferred: usize,
    pub failed_neighbours: Vec<String>,
}

enum MessageOutcome {
    Forwarded,
    Rejected,
}

pub struct DeliveryManager {
    store: SharedDatabase,
    gateway: Box<dyn Gateway>,
    compress_threshold: Option<usize>,
    sweep_lock: Mutex<()>,
}

impl DeliveryManager {
    pub fn new(
        store: SharedDatabase,
        gateway: impl Gateway + 'static,
        compress_threshold: Option<usize>,
    ) -> Self {
        Self {
            store,
            gateway: Box::new(gateway),
            compress_threshold,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Attempt delivery of every pending message.  Sweeps never overlap: a
    /// call made while another sweep runs waits for it to finish.
    pub async fn run_sweep(&self) -> Result<SweepReport, DeliveryError> {
        let _sweep = self.sweep_lock.lock().await;

        let (options, pending, table) = self.store.with(|db| {
            let options = db.get_system_options()?;
            let pending = db.list_pending_outbound(&options.callsign)?;
            let table = RoutingTable::load(db)?;
            Ok((options, pending, table))
        })?;

        let mut report = SweepReport {
            pending: pending.len(),
            ..SweepReport::default()
        };
        if pending.is_empty() {
            debug!("nothing to deliver");
            return Ok(report);
        }

        let mut batches: Vec<(Neighbour, Vec<Message>)> = Vec::new();
        for message in pending {
            match table.resolve_next_hop(&message.destination) {
                Ok(hop) => match batches
                    .iter_mut()
                    .find(|(n, _)| n.callsign.eq_ignore_ascii_case(&hop.callsign))
                {
                    Some((_, batch)) => batch.push(message),
                    None => batches.push((hop.clone(), vec![message])),
                },
                Err(e @ RoutingError::NoRoute { .. }) => {
                    debug!(id = %message.id, error = %e, "message not routable yet");
                    report.unroutable += 1;
                }
                Err(e @ RoutingError::UnknownNeighbour { .. }) => {
                    warn!(id = %message.id, error = %e, "route misconfigured");
                    report.unroutable += 1;
                }
            }
        }

        for (neighbour, batch) in batches {
            let result = self
                .deliver_batch(&neighbour, &options, &batch, &mut report)
                .await;
            if let Err(e) = result {
                warn!(neighbour = %neighbour.callsign, error = %e, "delivery to neighbour abandoned for this sweep");
                report.failed_neighbours.push(neighbour.callsign);
            }
        }

        info!(
            pending = report.pending,
            forwarded = report.forwarded,
            rejected = report.rejected,
            bad = report.bad,
            unroutable = report.unroutable,
            deferred = report.deferred,
            "delivery sweep finished"
        );
        Ok(report)
    }

    async fn deliver_batch(
        &self,
        neighbour: &Neighbour,
        options: &SystemOptions,
        batch: &[Message],
        report: &mut SweepReport,
    ) -> Result<(), DeliveryError> {
        let mut client = match self.gateway.connect(neighbour, options).await {
            Ok(client) => client,
            Err(e) => {
                report.deferred += batch.len();
                return Err(e);
            }
        };
        info!(neighbour = %neighbour.callsign, messages = batch.len(), "connected to neighbour");

        for (sent, message) in batch.iter().enumerate() {
            match self.deliver_one(&mut client, message).await {
                Ok(MessageOutcome::Forwarded) => report.forwarded += 1,
                Ok(MessageOutcome::Rejected) => report.rejected += 1,
                Err(e) => {
                    if matches!(e, DeliveryError::PayloadBad(_)) {
                        report.bad += 1;
                        report.deferred += batch.len() - sent - 1;
                    } else {
                        report.deferred += batch.len() - sent;
                    }
                    client.quit().await;
                    return Err(e);
                }
            }
        }

        client.quit().await;
        Ok(())
    }

    async fn deliver_one(
        &self,
        client: &mut DappsClient,
        message: &Message,
    ) -> Result<MessageOutcome, DeliveryError> {
        let (format, wire) = encode_payload(&message.payload, self.compress_threshold)?;
        let offer = message.to_offer(format);

        if client.offer(&offer).await? == OfferOutcome::Rejected {
            warn!(id = %message.id, dst = %message.destination, "neighbour refused offer");
            return Ok(MessageOutcome::Rejected);
        }

        match client.send_data(&offer.id, &wire).await? {
            DataOutcome::Acked => {
                self.store.with(|db| db.mark_forwarded(&message.id))?;
                info!(id = %message.id, dst = %message.destination, fmt = %format, "message forwarded");
                Ok(MessageOutcome::Forwarded)
            }
            DataOutcome::Bad => Err(DeliveryError::PayloadBad(offer.id)),
        }
    }
}
