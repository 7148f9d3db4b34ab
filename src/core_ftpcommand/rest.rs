use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::debug;
use std::io;

/// Handles the REST command: stores a non-negative restart offset for
/// the next RETR or STOR. Preflight on unrelated commands clears it.
pub async fn handle_rest(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let offset: u64 = match cmd.argument.parse() {
        Ok(offset) => offset,
        Err(_) => {
            session
                .reply(ReplyCode::ParameterSyntaxError, "Invalid restart offset")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    session.set_rest(offset);
    debug!("Restart offset set to {}", offset);

    session
        .reply(
            ReplyCode::FileActionPending,
            &format!("Restart position accepted ({})", offset),
        )
        .await?;
    Ok(CommandOutcome::Done)
}
