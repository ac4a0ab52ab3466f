//! Content fingerprints and control-line checksums.
//!
//! A message id is the first seven hex characters of a SHA-1 digest over the
//! payload, prefixed with the little-endian timestamp when one is known.  The
//! id is a session-scoped handle: seven characters are enough to detect a
//! corrupted transfer on a single link, not to name a message globally.

use sha1::{Digest, Sha1};

use crate::constants::{CHECKSUM_LEN, ID_LEN};

/// Full lowercase hex SHA-1 digest of `timestamp_le || payload`.
pub fn full_hash(payload: &[u8], timestamp: Option<i64>) -> String {
    let mut hasher = Sha1::new();
    if let Some(ts) = timestamp {
        hasher.update(ts.to_le_bytes());
    }
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Compute the 7-character message id for a payload.
pub fn compute_id(payload: &[u8], timestamp: Option<i64>) -> String {
    let mut hash = full_hash(payload, timestamp);
    hash.truncate(ID_LEN);
    hash
}

/// Re-hash a received payload and compare against the id it was offered under.
pub fn matches_id(payload: &[u8], timestamp: Option<i64>, id: &str) -> bool {
    compute_id(payload, timestamp) == id
}

/// Checksum of a control line that does not contain its own `chk=` field.
pub fn line_checksum(line: &str) -> String {
    let digest = Sha1::digest(line.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(CHECKSUM_LEN);
    hex
}

/// True if `s` has the shape of a message id.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
