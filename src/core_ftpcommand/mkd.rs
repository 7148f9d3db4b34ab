use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the MKD command.
pub async fn handle_mkd(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    if !session.check_access(&resolved.virtual_path, Permissions::MKDIR) {
        session
            .reply(ReplyCode::FileUnavailable, "Permission denied")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if core_fs::exists(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "Directory already exists")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match core_fs::create_dir(&resolved.physical).await {
        Ok(()) => {
            info!("Created directory {:?}", resolved.physical);
            session
                .reply(
                    ReplyCode::PathCreated,
                    &format!("\"{}\" created", resolved.virtual_path),
                )
                .await?;
        }
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "Failed to create directory")
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
