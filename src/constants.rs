// src/constants.rs

/// Buffer size used by the transfer worker for each read/write chunk.
pub const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum accepted length of a single control-channel command line,
/// terminating CRLF included.
pub const MAX_COMMAND_LINE: usize = 1024;

/// Maximum length of a command verb (RFC 959 verbs are 3 or 4 characters).
pub const MAX_VERB_LEN: usize = 8;

/// Idle timeout on the control connection before the session is dropped.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 300_000;

/// How long a transfer command waits for the data connection to come up.
pub const DATA_CHANNEL_TIMEOUT_MS: u64 = 10_000;

/// Port range scanned for a PASV listener.
pub const PASV_PORT_MIN: u16 = 20_000;
pub const PASV_PORT_MAX: u16 = 65_535;

/// Depth cap for recursive directory removal.
pub const MAX_DIR_RECURSION: usize = 256;

pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_ROOT_DIR: &str = "./ftp_root";
pub const DEFAULT_MAX_CONNECTIONS: i32 = 100;
pub const DEFAULT_MAX_BACKLOG: u32 = 10;
pub const DEFAULT_USERS_FILE: &str = "users.db";

/// Home directory granted to the virtual anonymous user when the user
/// database does not define one.
pub const DEFAULT_ANONYMOUS_HOME: &str = "/pub";
