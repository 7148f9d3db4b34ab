use super::handlers::CommandOutcome;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

/// NOOP is valid in every session state and carries no preflight.
pub async fn handle_noop(session: Session, _cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    session
        .reply(ReplyCode::CommandOkay, "NOOP command successful")
        .await?;
    Ok(CommandOutcome::Done)
}
