//! The accept loop: enforces the connection cap, spawns one session task
//! per control connection, and drives each session's command loop.

use crate::config::Config;
use crate::constants::MAX_COMMAND_LINE;
use crate::core_auth::UserStore;
use crate::core_filelock::LockTable;
use crate::core_ftpcommand::{CommandOutcome, CommandRegistry};
use crate::core_network::{self, NetError};
use crate::core_protocol::{self, format_reply, ReplyCode};
use crate::session::{ServerContext, Session};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Builds the process-wide context: root directory, credential store,
/// lock table.
pub fn build_context(config: Config) -> Result<Arc<ServerContext>> {
    if !config.root_dir.is_dir() {
        info!("Creating root directory {}", config.root_dir.display());
        std::fs::create_dir_all(&config.root_dir).with_context(|| {
            format!("Failed to create root directory {}", config.root_dir.display())
        })?;
    }

    let users = UserStore::new(
        config.anonymous_enabled,
        &config.anonymous_home,
        config.anonymous_permissions,
    );
    // The user database is optional; a missing file just means
    // anonymous-only operation.
    if let Err(err) = users.load_file(&config.users_file) {
        warn!("Could not load user database: {}", err);
    }

    Ok(Arc::new(ServerContext {
        config,
        users,
        locks: LockTable::new(),
    }))
}

/// Binds the control listener and serves until a shutdown signal
/// arrives, then drains the in-flight sessions.
pub async fn run(config: Config) -> Result<()> {
    let ctx = build_context(config)?;

    let listener = core_network::listen(
        ctx.config.addr_family,
        ctx.config.port,
        ctx.config.max_backlog,
    )
    .with_context(|| format!("Failed to bind control listener on port {}", ctx.config.port))?;

    info!("Server listening on port {}", ctx.config.port);
    serve(listener, ctx, shutdown_signal()).await
}

/// The accept loop proper. `shutdown` resolving stops accepting; the
/// sessions already in flight are then allowed to finish.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let registry = Arc::new(CommandRegistry::standard());
    let mut sessions: JoinSet<()> = JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        // Reap finished session tasks so the cap counts live ones only.
        while sessions.try_join_next().is_some() {}

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!("Failed to accept client connection: {}", err);
                        continue;
                    }
                };

                info!("Accepted connection from {}", peer);

                let max_connections = ctx.config.max_connections;
                if max_connections > 0 && sessions.len() >= max_connections as usize {
                    warn!(
                        "Server busy, rejecting connection from {} (max connections: {})",
                        peer, max_connections
                    );
                    reject_busy(stream).await;
                    continue;
                }

                let ctx = Arc::clone(&ctx);
                let registry = Arc::clone(&registry);
                sessions.spawn(async move {
                    if let Err(err) = handle_connection(ctx, registry, stream, peer).await {
                        warn!("Connection error for {}: {:#}", peer, err);
                    }
                    info!("Connection closed for {}", peer);
                });
            }
        }
    }

    drop(listener);
    if !sessions.is_empty() {
        info!("Waiting for {} active sessions to finish", sessions.len());
    }
    while sessions.join_next().await.is_some() {}

    Ok(())
}

/// One 421 and straight to close; the session never comes up.
async fn reject_busy(mut stream: TcpStream) {
    let reply = format_reply(
        ReplyCode::ServiceNotAvailable,
        "Service not available, too many connections",
    );
    if let Err(err) = core_network::send_all(&mut stream, reply.as_bytes()).await {
        debug!("Failed to send busy reply: {}", err);
    }
}

/// The per-connection command loop: greeting, then read-parse-dispatch
/// until QUIT, timeout, or the peer goes away.
async fn handle_connection(
    ctx: Arc<ServerContext>,
    registry: Arc<CommandRegistry>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let local_ip = stream.local_addr()?.ip();
    let (read_half, write_half) = stream.into_split();

    let session = Session::new(
        Arc::clone(&ctx),
        write_half,
        peer.ip(),
        peer.port(),
        local_ip,
    );

    session
        .reply(ReplyCode::ServiceReady, "FTP Server Ready")
        .await?;

    let mut reader = BufReader::new(read_half);
    let timeout = Duration::from_millis(ctx.config.command_timeout_ms);

    loop {
        let line = match core_network::recv_line(&mut reader, MAX_COMMAND_LINE, timeout).await {
            Ok(line) => line,
            Err(NetError::Timeout) => {
                info!("Client {} idle timeout, closing connection", peer);
                break;
            }
            Err(NetError::PeerClosed) => {
                info!("Client {} disconnected", peer);
                break;
            }
            Err(NetError::Overflow) => {
                warn!("Client {} sent an overlong command line", peer);
                let _ = session
                    .reply(ReplyCode::CommandSyntaxError, "Command line too long")
                    .await;
                break;
            }
            Err(NetError::Io(err)) => {
                warn!("Error receiving command from {}: {}", peer, err);
                break;
            }
        };

        let cmd = match core_protocol::parse_command(&line) {
            Ok(cmd) => cmd,
            Err(_) => {
                warn!("Failed to parse command from {}: {:?}", peer, line.trim_end());
                session
                    .reply(
                        ReplyCode::CommandSyntaxError,
                        "Syntax error, command unrecognized",
                    )
                    .await?;
                continue;
            }
        };

        session.record_command();

        if cmd.verb == "PASS" {
            info!("Client {}: PASS ****", peer);
        } else {
            info!("Client {}: {} {}", peer, cmd.verb, cmd.argument);
        }

        match registry.dispatch(&session, &cmd).await {
            Ok(CommandOutcome::Done) => {}
            Ok(CommandOutcome::Quit) => break,
            Err(err) => {
                // A failed control write means the peer is gone.
                warn!("Control channel write failed for {}: {}", peer, err);
                break;
            }
        }
    }

    // Tear down anything the session still owns. A worker mid-transfer
    // is woken and will find its control writes failing.
    session.request_abort();
    session.close_data_channel();

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!("Could not install SIGTERM handler: {}", err);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
