//! Domain model structs persisted in the relay database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dapps_shared::fingerprint::compute_id;
use dapps_shared::{Offer, PayloadFormat};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A payload held by this node, either submitted locally or received from a peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 7-character content fingerprint.
    pub id: String,
    /// Raw (decompressed) payload bytes.
    pub payload: Vec<u8>,
    /// Sender-supplied epoch milliseconds, part of the fingerprint when present.
    pub timestamp: Option<i64>,
    /// Bare callsign or `queue@system`.
    pub destination: String,
    /// Extra `key=value` pairs carried on the offer line.
    #[serde(default)]
    pub extra_properties: BTreeMap<String, String>,
    /// Set once a neighbour has acknowledged the payload.
    pub forwarded: bool,
    /// When the record was stored locally.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new pending message, deriving its id from payload and timestamp.
    pub fn compose(
        destination: impl Into<String>,
        payload: Vec<u8>,
        timestamp: Option<i64>,
        extra_properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: compute_id(&payload, timestamp),
            payload,
            timestamp,
            destination: destination.into(),
            extra_properties,
            forwarded: false,
            created_at: Utc::now(),
        }
    }

    /// Materialise a verified inbound transfer.
    pub fn from_offer(offer: &Offer, payload: Vec<u8>) -> Self {
        Self {
            id: offer.id.clone(),
            payload,
            timestamp: offer.timestamp,
            destination: offer.destination.clone(),
            extra_properties: offer.extra_properties.clone(),
            forwarded: false,
            created_at: Utc::now(),
        }
    }

    /// The `ihave` offer describing this message, before any compression choice.
    pub fn to_offer(&self, format: PayloadFormat) -> Offer {
        Offer {
            id: self.id.clone(),
            length: self.payload.len(),
            format,
            timestamp: self.timestamp,
            destination: self.destination.clone(),
            extra_properties: self.extra_properties.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Maps a destination system (or `*`) to the callsign of the next hop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteHint {
    pub destination: String,
    pub next_hop: String,
}

/// A directly reachable node and the terminal lines that reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Neighbour {
    pub callsign: String,
    /// Lines sent after gateway login; `PAUSE <ms>` entries are delays.
    #[serde(default)]
    pub connect_script: Vec<String>,
}

// ---------------------------------------------------------------------------
// SystemOptions
// ---------------------------------------------------------------------------

/// Node identity and gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemOptions {
    pub node_host: String,
    pub fbb_port: u16,
    pub fbb_user: String,
    pub fbb_password: String,
    pub callsign: String,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            node_host: "localhost".into(),
            fbb_port: 8011,
            fbb_user: "telnetportuser".into(),
            fbb_password: "telnetportpassword".into(),
            callsign: "N0CALL".into(),
        }
    }
}
