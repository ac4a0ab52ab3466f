use serde::{Deserialize, Serialize};

/// Encoding of a payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Plain,
    Deflate,
}

impl PayloadFormat {
    /// Single-letter code used in `fmt=`.
    pub fn code(&self) -> &'static str {
        match self {
            PayloadFormat::Plain => "p",
            PayloadFormat::Deflate => "d",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(Self::Plain),
            "d" => Some(Self::Deflate),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Strip an SSID suffix: `GB7RDG-4` -> `GB7RDG`.
pub fn base_callsign(callsign: &str) -> &str {
    callsign.split('-').next().unwrap_or(callsign)
}

/// Callsigns compare case-insensitively and without SSID.
pub fn same_station(a: &str, b: &str) -> bool {
    base_callsign(a).eq_ignore_ascii_case(base_callsign(b))
}

/// System component of a destination: the part after the last `@`, or the
/// whole destination when it is a bare callsign.
pub fn destination_system(destination: &str) -> &str {
    destination
        .rsplit_once('@')
        .map(|(_, system)| system)
        .unwrap_or(destination)
}

/// Whether a destination names this node, either bare or as `queue@node`.
pub fn is_local_destination(destination: &str, own_callsign: &str) -> bool {
    same_station(destination, own_callsign) || same_station(destination_system(destination), own_callsign)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes() {
        assert_eq!(PayloadFormat::from_code("p"), Some(PayloadFormat::Plain));
        assert_eq!(PayloadFormat::from_code("d"), Some(PayloadFormat::Deflate));
        assert_eq!(PayloadFormat::from_code("z"), None);
        assert_eq!(PayloadFormat::from_code("P"), None);
        assert_eq!(PayloadFormat::Deflate.to_string(), "d");
    }

    #[test]
    fn test_base_callsign() {
        assert_eq!(base_callsign("GB7RDG-4"), "GB7RDG");
        assert_eq!(base_callsign("M0LTE"), "M0LTE");
    }

    #[test]
    fn test_destination_system() {
        assert_eq!(destination_system("testqueue@gb7rdg"), "gb7rdg");
        assert_eq!(destination_system("a@b@SYS1"), "SYS1");
        assert_eq!(destination_system("M0LTE"), "M0LTE");
    }

    #[test]
    fn test_is_local_destination() {
        assert!(is_local_destination("N0CALL", "N0CALL"));
        assert!(is_local_destination("queue@n0call-2", "N0CALL"));
        assert!(!is_local_destination("queue@GB7RDG", "N0CALL"));
    }
}
