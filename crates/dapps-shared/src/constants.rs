/// Prompt written by the server once the peer has identified itself
pub const PROMPT: &str = "DAPPSv1>";

/// Number of hex characters of the SHA-1 digest used as a message id
pub const ID_LEN: usize = 7;

/// Number of hex characters in an `ihave` line checksum
pub const CHECKSUM_LEN: usize = 2;

/// Key under which a route hint acts as the default route
pub const DEFAULT_ROUTE: &str = "*";

/// Default largest payload (decompressed) a session will accept (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Longest control line accepted before the session is dropped
pub const MAX_LINE_LEN: usize = 4096;

/// Default TCP port the inbound listener binds to
pub const DEFAULT_LISTEN_PORT: u16 = 11000;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Keys with protocol meaning in an `ihave` line; anything else is an extra property
pub const KEY_LENGTH: &str = "len";
pub const KEY_FORMAT: &str = "fmt";
pub const KEY_TIMESTAMP: &str = "ts";
pub const KEY_DESTINATION: &str = "dst";
pub const KEY_CHECKSUM: &str = "chk";

pub const RESERVED_KEYS: [&str; 5] = [
    KEY_LENGTH,
    KEY_FORMAT,
    KEY_TIMESTAMP,
    KEY_DESTINATION,
    KEY_CHECKSUM,
];

/// Static reply to a help request
pub const HELP_TEXT: &str =
    "DAPPSv1 commands: ihave <id> len=<n> [fmt=p|d] [ts=<ms>] [k=v ...] dst=<dest> [chk=<hh>] | data <id> | q";

/// Reply to a line the server does not understand
pub const UNKNOWN_COMMAND_REPLY: &str = "?";
