use super::handlers::CommandOutcome;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the QUIT command: logs the session statistics, sends them to
/// an authenticated client as a multi-line 221, waits for any in-flight
/// transfer worker, and tells the command loop to close the connection.
pub async fn handle_quit(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "QUIT does not take parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session.wait_for_transfer().await;

    let stats = session.stats();
    let duration_secs = session.connect_elapsed().as_secs();
    let authenticated = session.is_authenticated();

    if authenticated {
        info!(
            "User '{}' logging out from {}:{} - {} bytes up, {} bytes down, {} files up, {} files down, {} commands, {} seconds",
            session.username(),
            session.peer_ip(),
            session.peer_port(),
            stats.bytes_uploaded,
            stats.bytes_downloaded,
            stats.files_uploaded,
            stats.files_downloaded,
            stats.commands_received,
            duration_secs
        );
    } else {
        info!(
            "Client {}:{} disconnecting (not logged in) - {} commands, {} seconds",
            session.peer_ip(),
            session.peer_port(),
            stats.commands_received,
            duration_secs
        );
    }

    session.set_closing();

    if authenticated {
        let code = ReplyCode::ClosingControlConnection;
        session
            .reply_continuation(code, "Goodbye! Session statistics:")
            .await?;
        session
            .reply_continuation(code, &format!("  Data uploaded: {} bytes", stats.bytes_uploaded))
            .await?;
        session
            .reply_continuation(
                code,
                &format!("  Data downloaded: {} bytes", stats.bytes_downloaded),
            )
            .await?;
        session
            .reply_continuation(code, &format!("  Files uploaded: {}", stats.files_uploaded))
            .await?;
        session
            .reply_continuation(code, &format!("  Files downloaded: {}", stats.files_downloaded))
            .await?;
        session
            .reply_continuation(
                code,
                &format!("  Commands received: {}", stats.commands_received),
            )
            .await?;
        session
            .reply_continuation(code, &format!("  Session duration: {} seconds", duration_secs))
            .await?;
        session.reply(code, "Closing connection").await?;
    } else {
        session
            .reply(
                ReplyCode::ClosingControlConnection,
                &format!("Goodbye. Session duration: {} seconds", duration_secs),
            )
            .await?;
    }

    Ok(CommandOutcome::Quit)
}
