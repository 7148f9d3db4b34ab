use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

/// FEAT advertises the RFC 3659 extensions this server implements.
pub async fn handle_feat(session: Session, _cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    let code = ReplyCode::SystemStatus;
    session.reply_continuation(code, "Features:").await?;
    session.reply_continuation(code, " SIZE").await?;
    session.reply_continuation(code, " MDTM").await?;
    session.reply_continuation(code, " REST STREAM").await?;
    session.reply(code, "End").await?;

    Ok(CommandOutcome::Done)
}
