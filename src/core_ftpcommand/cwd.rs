use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::debug;
use std::io;

/// Handles the CWD command. The path is resolved against the current
/// virtual directory and must stay inside the user's sandbox.
pub async fn handle_cwd(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match session.change_directory(&cmd.argument).await {
        Ok(()) => {
            session
                .reply(ReplyCode::FileActionOkay, "Directory successfully changed")
                .await?;
        }
        Err(err) => {
            debug!(
                "CWD '{}' refused for {}:{}: {}",
                cmd.argument,
                session.peer_ip(),
                session.peer_port(),
                err
            );
            session
                .reply(ReplyCode::FileUnavailable, "Failed to change directory")
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
