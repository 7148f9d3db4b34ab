use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

pub async fn handle_pwd(session: Session, _cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    let current_dir = session.current_dir();
    session
        .reply(
            ReplyCode::PathCreated,
            &format!("\"{}\" is current directory", current_dir),
        )
        .await?;

    Ok(CommandOutcome::Done)
}
