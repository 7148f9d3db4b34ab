use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the DELE command. The exclusive lock is held across the
/// unlink so a delete cannot race an in-flight transfer of the same
/// file.
pub async fn handle_dele(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    if !session.check_access(&resolved.virtual_path, Permissions::DELETE) {
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
            .reply(ReplyCode::FileUnavailable, "Is a directory, use RMD")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if session.locks().is_exclusive_locked(&resolved.physical) {
        session
            .reply(
                ReplyCode::TransientFileError,
                "File is currently being written to, please try again later",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }
    if session.locks().shared_count(&resolved.physical) > 0 {
        session
            .reply(
                ReplyCode::TransientFileError,
                "File is currently being read, please try again later",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let _guard = session.locks().acquire_exclusive(&resolved.physical).await;

    if !core_fs::exists(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "File not found")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match core_fs::delete_file(&resolved.physical).await {
        Ok(()) => {
            info!("Deleted file {:?}", resolved.physical);
            session.reply(ReplyCode::FileActionOkay, "File deleted").await?;
        }
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "Failed to delete file")
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
