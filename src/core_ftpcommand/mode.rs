use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{self, ParsedCommand, ReplyCode, TransferMode};
use crate::session::Session;
use std::io;

/// Handles the MODE command. Only stream mode is supported.
pub async fn handle_mode(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let mode = match core_protocol::parse_mode(&cmd.argument) {
        Ok(m) => m,
        Err(_) => {
            session
                .reply(ReplyCode::ParameterSyntaxError, "Invalid mode parameter")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    if mode != TransferMode::Stream {
        session
            .reply(
                ReplyCode::CommandNotImplementedForParameter,
                "Mode not supported (only Stream mode supported)",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session.set_transfer_mode(mode);
    session
        .reply(ReplyCode::CommandOkay, "Mode set to Stream")
        .await?;
    Ok(CommandOutcome::Done)
}
