use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the REIN command: tears down any running transfer the way
/// ABOR would, then resets every piece of session state except the
/// statistics counters.
pub async fn handle_rein(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "REIN does not take parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    info!(
        "Reinitializing session for {}:{}",
        session.peer_ip(),
        session.peer_port()
    );

    session.request_abort();
    session.wait_for_transfer().await;
    session.close_data_channel();
    session.reset_for_rein();

    session
        .reply(ReplyCode::ServiceReady, "Service ready for new user")
        .await?;
    Ok(CommandOutcome::Done)
}
