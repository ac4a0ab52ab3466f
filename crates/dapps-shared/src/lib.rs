//! # dapps-shared
//!
//! Wire-level vocabulary shared by the DAPPS store and server: message
//! fingerprints, control-line checksums, the `ihave`/`send`/`data`/`ack`
//! exchange, and destination helpers.

pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Command, Offer, Reply};
pub use types::PayloadFormat;
