use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use std::io;

/// Handles the SIZE extension (RFC 3659): the byte size of a plain
/// file, read under a shared lock so a concurrent writer cannot give a
/// torn answer.
pub async fn handle_size(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    if !core_fs::exists(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "File not found")
            .await?;
        return Ok(CommandOutcome::Done);
    }
    if core_fs::is_dir(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "Not a regular file")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let size = {
        let _guard = session.locks().acquire_shared(&resolved.physical).await;
        core_fs::size(&resolved.physical).await
    };

    match size {
        Ok(size) => {
            session
                .reply(ReplyCode::FileStatus, &size.to_string())
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
