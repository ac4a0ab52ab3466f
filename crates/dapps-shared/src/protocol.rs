//! Control lines of the DAPPSv1 exchange.
//!
//! The client offers a message with an `ihave` line, the server answers
//! `send` or `error`, the client follows with `data <id>` and the raw (or
//! deflated) payload, and the server answers `ack` or `bad`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    KEY_CHECKSUM, KEY_DESTINATION, KEY_FORMAT, KEY_LENGTH, KEY_TIMESTAMP, RESERVED_KEYS,
};
use crate::error::ProtocolError;
use crate::fingerprint::{is_valid_id, line_checksum};
use crate::types::PayloadFormat;

/// Line the client sends to end a session.
pub const QUIT: &str = "q";

/// A line read by the server while idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    /// The full `ihave` line, kept verbatim for checksum verification.
    IHave(String),
    Data(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();
        let Some(keyword) = tokens.next() else {
            // blank line ends the session
            return Command::Quit;
        };

        match keyword {
            "q" | "quit" | "Q" | "QUIT" if tokens.next().is_none() => Command::Quit,
            "?" | "help" | "info" | "HELP" | "INFO" if tokens.next().is_none() => Command::Help,
            "ihave" => Command::IHave(trimmed.to_string()),
            "data" => match (tokens.next(), tokens.next()) {
                (Some(id), None) => Command::Data(id.to_string()),
                _ => Command::Unknown(trimmed.to_string()),
            },
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

/// Metadata announcing a message that is about to be transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    /// Decompressed payload length in bytes.
    pub length: usize,
    pub format: PayloadFormat,
    pub timestamp: Option<i64>,
    pub destination: String,
    /// Non-protocol `key=value` pairs, preserved verbatim.
    pub extra_properties: BTreeMap<String, String>,
}

/// The id named by an `ihave` line, or `""` if there is none.
///
/// Used to address an `error` reply even when the rest of the line is junk.
pub fn offered_id(line: &str) -> &str {
    line.split_whitespace().nth(1).unwrap_or("")
}

/// Whether a property can be carried as an extra `key=value` token.
pub fn is_valid_property(key: &str, value: &str) -> bool {
    !key.is_empty()
        && !RESERVED_KEYS.contains(&key)
        && !key.contains('=')
        && !key.chars().any(char::is_whitespace)
        && !value.chars().any(char::is_whitespace)
}

impl Offer {
    /// Parse and validate an `ihave` line.
    ///
    /// When a `chk=` field is present it is checked against the line rebuilt
    /// from every other token, so the checksum value itself can never leak
    /// into the hashed text.
    pub fn parse(line: &str, max_length: usize) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("ihave") {
            return Err(ProtocolError::malformed("not an ihave line"));
        }

        let id = tokens
            .next()
            .ok_or_else(|| ProtocolError::malformed("missing id"))?;
        if !is_valid_id(id) {
            return Err(ProtocolError::malformed(format!("invalid id '{id}'")));
        }

        let mut unsigned = vec!["ihave", id];
        let mut claimed_checksum = None;
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();

        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ProtocolError::malformed(format!("expected key=value, got '{token}'"))
            })?;
            if key.is_empty() {
                return Err(ProtocolError::malformed(format!("empty key in '{token}'")));
            }

            if key == KEY_CHECKSUM {
                if claimed_checksum.replace(value).is_some() {
                    return Err(ProtocolError::malformed("duplicate chk"));
                }
                continue;
            }

            unsigned.push(token);
            if fields.insert(key, value).is_some() {
                return Err(ProtocolError::malformed(format!("duplicate key '{key}'")));
            }
        }

        if let Some(claimed) = claimed_checksum {
            let computed = line_checksum(&unsigned.join(" "));
            if !claimed.eq_ignore_ascii_case(&computed) {
                return Err(ProtocolError::ChecksumMismatch {
                    claimed: claimed.to_string(),
                    computed,
                });
            }
        }

        let length = match fields.remove(KEY_LENGTH) {
            None => return Err(ProtocolError::malformed("missing len")),
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|len| *len > 0)
                .ok_or_else(|| ProtocolError::malformed(format!("invalid len '{raw}'")))?,
        };
        if length > max_length {
            return Err(ProtocolError::malformed(format!(
                "len {length} exceeds limit {max_length}"
            )));
        }

        let format = match fields.remove(KEY_FORMAT) {
            None => PayloadFormat::Plain,
            Some(raw) => PayloadFormat::from_code(raw)
                .ok_or_else(|| ProtocolError::malformed(format!("unknown fmt '{raw}'")))?,
        };

        let timestamp = fields
            .remove(KEY_TIMESTAMP)
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| ProtocolError::malformed(format!("invalid ts '{raw}'")))
            })
            .transpose()?;

        let destination = fields
            .remove(KEY_DESTINATION)
            .filter(|dst| !dst.is_empty())
            .ok_or_else(|| ProtocolError::malformed("missing dst"))?
            .to_string();

        let extra_properties = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(Offer {
            id: id.to_string(),
            length,
            format,
            timestamp,
            destination,
            extra_properties,
        })
    }

    /// Render the offer as an `ihave` line terminated by its checksum field.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "ihave {} {KEY_LENGTH}={} {KEY_FORMAT}={}",
            self.id,
            self.length,
            self.format.code()
        );
        if let Some(ts) = self.timestamp {
            line.push_str(&format!(" {KEY_TIMESTAMP}={ts}"));
        }
        for (key, value) in &self.extra_properties {
            line.push_str(&format!(" {key}={value}"));
        }
        line.push_str(&format!(" {KEY_DESTINATION}={}", self.destination));

        let chk = line_checksum(&line);
        format!("{line} {KEY_CHECKSUM}={chk}")
    }
}

/// Announce the payload for an accepted offer.
pub fn data_line(id: &str) -> String {
    format!("data {id}")
}

/// A server response to an offer or a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// One or more ids the server is ready to receive.
    Send(Vec<String>),
    Error(String),
    Ack(String),
    Bad(String),
}

impl Reply {
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next()?;
        let ids: Vec<String> = tokens.map(str::to_string).collect();

        match (keyword, ids.as_slice()) {
            ("send", [_, ..]) => Some(Reply::Send(ids)),
            ("error", []) => Some(Reply::Error(String::new())),
            ("error", [id]) => Some(Reply::Error(id.clone())),
            ("ack", [id]) => Some(Reply::Ack(id.clone())),
            ("bad", [id]) => Some(Reply::Bad(id.clone())),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Reply::Send(ids) => format!("send {}", ids.join(" ")),
            Reply::Error(id) if id.is_empty() => "error".to_string(),
            Reply::Error(id) => format!("error {id}"),
            Reply::Ack(id) => format!("ack {id}"),
            Reply::Bad(id) => format!("bad {id}"),
        }
    }

    /// True for a `send` that includes `id`.
    pub fn accepts(&self, id: &str) -> bool {
        matches!(self, Reply::Send(ids) if ids.iter().any(|i| i == id))
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MAX_PAYLOAD_LEN;

    const EXAMPLE: &str = "ihave de75866 len=11 fmt=p ts=100000000 dst=testqueue@gb7rdg";

    fn parse(line: &str) -> Result<Offer, ProtocolError> {
        Offer::parse(line, DEFAULT_MAX_PAYLOAD_LEN)
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(""), Command::Quit);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("?"), Command::Help);
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("data de75866"), Command::Data("de75866".into()));
        assert_eq!(Command::parse(EXAMPLE), Command::IHave(EXAMPLE.into()));
        assert!(matches!(Command::parse("data"), Command::Unknown(_)));
        assert!(matches!(Command::parse("hello there"), Command::Unknown(_)));
    }

    #[test]
    fn test_parse_example_offer() {
        let offer = parse(EXAMPLE).unwrap();
        assert_eq!(offer.id, "de75866");
        assert_eq!(offer.length, 11);
        assert_eq!(offer.format, PayloadFormat::Plain);
        assert_eq!(offer.timestamp, Some(100_000_000));
        assert_eq!(offer.destination, "testqueue@gb7rdg");
        assert!(offer.extra_properties.is_empty());
    }

    #[test]
    fn test_parse_with_valid_checksum_and_extras() {
        let base = "ihave de75866 len=11 fmt=d ts=5 mykey=myvalue dst=q@sys";
        let line = format!("{base} chk={}", line_checksum(base));
        let offer = parse(&line).unwrap();
        assert_eq!(offer.format, PayloadFormat::Deflate);
        assert_eq!(offer.extra_properties.get("mykey").map(String::as_str), Some("myvalue"));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let base = "ihave de75866 len=11 fmt=p dst=q@sys";
        let good = line_checksum(base);
        let bad = if good == "00" { "01" } else { "00" };
        let err = parse(&format!("{base} chk={bad}")).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_checksum_value_elsewhere_in_line_is_harmless() {
        // the checksum text recurring in another field must not disturb verification
        let base = "ihave de75866 len=11 fmt=p dst=q@sys";
        let chk = line_checksum(base);
        let with_echo = format!("ihave de75866 len=11 fmt=p note={chk} dst=q@sys");
        let line = format!("{with_echo} chk={}", line_checksum(&with_echo));
        assert!(parse(&line).is_ok());
    }

    #[test]
    fn test_missing_len_rejected() {
        let err = parse("ihave de75866 fmt=p dst=q@sys").unwrap_err();
        assert_eq!(err, ProtocolError::malformed("missing len"));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        assert!(parse("ihave de75866 len=0 dst=q@sys").is_err());
        assert!(parse("ihave de75866 len=-4 dst=q@sys").is_err());
        assert!(parse("ihave de75866 len=abc dst=q@sys").is_err());
        assert!(parse("ihave de75866 len=3 fmt=x dst=q@sys").is_err());
        assert!(parse("ihave de75866 len=3 ts=soon dst=q@sys").is_err());
        assert!(parse("ihave de75866 len=3").is_err());
        assert!(parse("ihave de75866 len=3 dst=").is_err());
        assert!(parse("ihave de75866 len=3 dst=a dst=b").is_err());
        assert!(parse("ihave de75866 len=3 junk dst=a").is_err());
        assert!(parse("ihave XYZ len=3 dst=a").is_err());
        assert!(parse("ihave").is_err());
    }

    #[test]
    fn test_len_limit() {
        assert!(Offer::parse("ihave de75866 len=11 dst=a", 10).is_err());
        assert!(Offer::parse("ihave de75866 len=10 dst=a", 10).is_ok());
    }

    #[test]
    fn test_defaults_when_optional_fields_absent() {
        let offer = parse("ihave de75866 len=3 dst=a").unwrap();
        assert_eq!(offer.format, PayloadFormat::Plain);
        assert_eq!(offer.timestamp, None);
    }

    #[test]
    fn test_to_line_is_accepted_by_parse() {
        let mut extra_properties = BTreeMap::new();
        extra_properties.insert("app".to_string(), "chat".to_string());
        let offer = Offer {
            id: "de75866".into(),
            length: 11,
            format: PayloadFormat::Plain,
            timestamp: Some(100_000_000),
            destination: "testqueue@gb7rdg".into(),
            extra_properties,
        };
        let line = offer.to_line();
        assert!(line.starts_with("ihave de75866 len=11 fmt=p ts=100000000 app=chat dst=testqueue@gb7rdg chk="));
        assert_eq!(parse(&line).unwrap(), offer);
    }

    #[test]
    fn test_offered_id() {
        assert_eq!(offered_id(EXAMPLE), "de75866");
        assert_eq!(offered_id("ihave"), "");
    }

    #[test]
    fn test_reply_parse() {
        assert_eq!(Reply::parse("send de75866"), Some(Reply::Send(vec!["de75866".into()])));
        assert!(Reply::parse("send aaaaaaa de75866").unwrap().accepts("de75866"));
        assert_eq!(Reply::parse("ack de75866"), Some(Reply::Ack("de75866".into())));
        assert_eq!(Reply::parse("bad de75866"), Some(Reply::Bad("de75866".into())));
        assert_eq!(Reply::parse("error"), Some(Reply::Error(String::new())));
        assert_eq!(Reply::parse("send"), None);
        assert_eq!(Reply::parse("DAPPSv1>"), None);
        assert_eq!(Reply::Error(String::new()).to_line(), "error");
        assert_eq!(Reply::Ack("abc1234".into()).to_string(), "ack abc1234");
    }

    #[test]
    fn test_property_validation() {
        assert!(is_valid_property("app", "chat"));
        assert!(!is_valid_property("len", "3"));
        assert!(!is_valid_property("a b", "c"));
        assert!(!is_valid_property("a", "c d"));
        assert!(!is_valid_property("", "x"));
    }
}
