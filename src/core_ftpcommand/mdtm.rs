use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::helpers;
use crate::session::Session;
use std::io;

/// Handles the MDTM extension (RFC 3659): last modification time as
/// `YYYYMMDDhhmmss` in UTC.
pub async fn handle_mdtm(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let resolved = match session.resolve_path(&cmd.argument) {
        Ok(resolved) => resolved,
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "Invalid path name")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    if !session.check_access(&resolved.virtual_path, Permissions::READ) {
        session
            .reply(ReplyCode::FileUnavailable, "Permission denied")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match core_fs::mtime(&resolved.physical).await {
        Ok(mtime) => {
            session
                .reply(ReplyCode::FileStatus, &helpers::mdtm_timestamp(mtime))
                .await?;
        }
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "File not found")
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
