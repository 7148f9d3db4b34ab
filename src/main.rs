use clap::error::ErrorKind;
use clap::Parser;
use ferroftpd::config::Config;
use ferroftpd::core_cli::Cli;
use ferroftpd::{core_log, server};
use log::{error, info};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits 2 on errors by default; the documented contract is 0
    // for help, 1 for anything malformed.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = err.print();
            return code;
        }
    };

    let Some(level) = core_log::parse_level(&cli.log_level) else {
        eprintln!(
            "Unknown log level '{}' (use DEBUG, INFO, WARN or ERROR)",
            cli.log_level
        );
        return ExitCode::FAILURE;
    };
    core_log::init(level);

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };

    info!("=== FTP Server Initializing ===");
    info!("  Port: {}", config.port);
    info!("  Root directory: {}", config.root_dir.display());
    info!("  Max connections: {}", config.max_connections);
    info!("  Command timeout: {} ms", config.command_timeout_ms);
    info!("  User database: {}", config.users_file.display());
    info!(
        "  Anonymous login: {}",
        if config.anonymous_enabled { "enabled" } else { "disabled" }
    );

    if let Err(err) = server::run(config).await {
        error!("{:#}", err);
        info!("=== FTP Server Stopped ===");
        return ExitCode::FAILURE;
    }

    info!("=== FTP Server Stopped ===");
    ExitCode::SUCCESS
}
