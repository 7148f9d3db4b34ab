use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "ferroftpd",
    about = "A multi-client FTP server written in Rust.",
    allow_negative_numbers = true
)]
pub struct Cli {
    /// Port to listen on (default: 21)
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Root directory served as "/" (default: ./ftp_root, created if missing)
    #[arg(short = 'r', long = "root")]
    pub root: Option<PathBuf>,

    /// Address family: ipv4, ipv6 or unspec (default: unspec)
    #[arg(short = 'a', long = "addr")]
    pub addr: Option<String>,

    /// Log level: DEBUG, INFO, WARN or ERROR
    #[arg(short = 'l', long = "log-level", default_value = "INFO")]
    pub log_level: String,

    /// Maximum concurrent connections, -1 for unlimited (default: 100)
    #[arg(short = 'c', long = "max-connections")]
    pub max_connections: Option<i32>,

    /// Path to an optional TOML configuration file
    #[arg(short = 'C', long = "config")]
    pub config: Option<PathBuf>,
}
