use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

/// CDUP is CWD ".." without an argument.
pub async fn handle_cdup(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "CDUP does not take parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match session.change_directory("..").await {
        Ok(()) => {
            session
                .reply(ReplyCode::FileActionOkay, "Directory successfully changed")
                .await?;
        }
        Err(_) => {
            session
                .reply(
                    ReplyCode::FileUnavailable,
                    "Failed to change to parent directory",
                )
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
