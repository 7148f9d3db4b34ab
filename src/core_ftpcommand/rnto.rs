use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the RNTO command: completes the rename prepared by RNFR.
pub async fn handle_rnto(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let Some(source) = session.take_rename_from() else {
        session
            .reply(
                ReplyCode::BadCommandSequence,
                "Bad sequence of commands (use RNFR first)",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    };

    let resolved = match session.resolve_path(&cmd.argument) {
        Ok(resolved) => resolved,
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "Invalid path name")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    if !session.check_access(&resolved.virtual_path, Permissions::RENAME) {
        session
            .reply(ReplyCode::FileUnavailable, "Permission denied")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if core_fs::exists(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "Target already exists")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let _guard = session.locks().acquire_exclusive(&source).await;

    if !core_fs::exists(&source).await {
        session
            .reply(ReplyCode::FileUnavailable, "Source no longer exists")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    match core_fs::rename(&source, &resolved.physical).await {
        Ok(()) => {
            info!("Renamed {:?} -> {:?}", source, resolved.physical);
            session
                .reply(ReplyCode::FileActionOkay, "Rename successful")
                .await?;
        }
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "Rename failed")
                .await?;
        }
    }

    Ok(CommandOutcome::Done)
}
