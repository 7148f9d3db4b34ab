use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

pub async fn handle_acct(session: Session, _cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }
    session
        .reply(ReplyCode::CommandNotImplemented, "ACCT not implemented")
        .await?;
    Ok(CommandOutcome::Done)
}
