use crate::constants::{
    DEFAULT_ANONYMOUS_HOME, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_MAX_BACKLOG,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, DEFAULT_ROOT_DIR, DEFAULT_USERS_FILE,
};
use crate::core_auth::Permissions;
use crate::core_cli::Cli;
use crate::core_network::AddrFamily;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Runtime configuration, assembled from defaults, the optional TOML
/// configuration file, and the command line (in increasing priority).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub addr_family: AddrFamily,
    pub root_dir: PathBuf,
    pub max_connections: i32,
    pub max_backlog: u32,
    pub command_timeout_ms: u64,
    pub users_file: PathBuf,
    pub anonymous_enabled: bool,
    pub anonymous_home: String,
    pub anonymous_permissions: Permissions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            addr_family: AddrFamily::Unspec,
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_backlog: DEFAULT_MAX_BACKLOG,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            users_file: PathBuf::from(DEFAULT_USERS_FILE),
            anonymous_enabled: true,
            anonymous_home: DEFAULT_ANONYMOUS_HOME.to_string(),
            anonymous_permissions: Permissions::READ,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    port: Option<u16>,
    addr: Option<String>,
    root_dir: Option<PathBuf>,
    max_connections: Option<i32>,
    command_timeout_ms: Option<u64>,
    users_file: Option<PathBuf>,
    anonymous_enabled: Option<bool>,
    anonymous_home: Option<String>,
    anonymous_permissions: Option<u8>,
}

impl Config {
    /// Builds the effective configuration from the parsed command line.
    pub fn from_cli(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = &cli.config {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
            let file: FileConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
            config.apply_file(file)?;
        }

        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(root) = &cli.root {
            config.root_dir = root.clone();
        }
        if let Some(addr) = &cli.addr {
            config.addr_family = parse_family(addr)?;
        }
        if let Some(max) = cli.max_connections {
            config.max_connections = max;
        }

        if !config.anonymous_home.starts_with('/') {
            bail!(
                "Anonymous home directory must be virtual-absolute: {}",
                config.anonymous_home
            );
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<()> {
        let section = file.server;
        if let Some(port) = section.port {
            self.port = port;
        }
        if let Some(addr) = section.addr {
            self.addr_family = parse_family(&addr)?;
        }
        if let Some(root) = section.root_dir {
            self.root_dir = root;
        }
        if let Some(max) = section.max_connections {
            self.max_connections = max;
        }
        if let Some(timeout) = section.command_timeout_ms {
            self.command_timeout_ms = timeout;
        }
        if let Some(users) = section.users_file {
            self.users_file = users;
        }
        if let Some(enabled) = section.anonymous_enabled {
            self.anonymous_enabled = enabled;
        }
        if let Some(home) = section.anonymous_home {
            self.anonymous_home = home;
        }
        if let Some(bits) = section.anonymous_permissions {
            self.anonymous_permissions = Permissions::from_bits(bits);
        }
        Ok(())
    }
}

fn parse_family(value: &str) -> Result<AddrFamily> {
    AddrFamily::parse(value)
        .with_context(|| format!("Invalid address family '{}' (use ipv4, ipv6 or unspec)", value))
}
