use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::debug;
use std::io;

/// Handles the RNFR command: validates the rename source and parks it in
/// the session for the RNTO that must follow immediately. Any other
/// command in between clears it through preflight.
pub async fn handle_rnfr(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    if !session.check_access(&resolved.virtual_path, Permissions::RENAME) {
        session
            .reply(ReplyCode::FileUnavailable, "Permission denied")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if !core_fs::exists(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "File or directory does not exist")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if session.locks().is_exclusive_locked(&resolved.physical)
        || session.locks().shared_count(&resolved.physical) > 0
    {
        session
            .reply(
                ReplyCode::TransientFileError,
                "File is busy, please try again later",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    // Quiescence probe: take and immediately drop the exclusive lock so
    // a transfer that slipped past the inspectors has drained.
    drop(session.locks().acquire_exclusive(&resolved.physical).await);

    debug!("Rename from: {:?}", resolved.physical);
    session.set_rename_from(resolved.physical);

    session
        .reply(ReplyCode::FileActionPending, "Ready for RNTO")
        .await?;
    Ok(CommandOutcome::Done)
}
