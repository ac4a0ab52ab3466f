use thiserror::Error;

/// Failures detected while interpreting the control lines and payloads of a session.
///
/// All of these are recovered inside the session: the server answers with
/// `error <id>` or `bad <id>` and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    #[error("Checksum mismatch: line carries {claimed}, computed {computed}")]
    ChecksumMismatch { claimed: String, computed: String },

    #[error("Integrity mismatch for {id}: payload hashes to {computed}")]
    IntegrityMismatch { id: String, computed: String },
}

impl ProtocolError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProtocolError::MalformedOffer(reason.into())
    }
}
