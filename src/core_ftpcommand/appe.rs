use super::handlers::CommandOutcome;
use super::utils::{open_data_or_reply, require_authenticated};
use crate::core_auth::Permissions;
use crate::core_filelock::LockGuard;
use crate::core_protocol::{ParsedCommand, ReplyCode, TransferType};
use crate::core_transfer::{TransferKind, TransferTask};
use crate::session::Session;
use crate::core_fs;
use std::io;

/// Handles the APPE command: like STOR, but writing starts at the
/// current end of file (the file is created when missing). Preflight has
/// already cleared any restart offset.
pub async fn handle_appe(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    if !session.check_access(&resolved.virtual_path, Permissions::WRITE) {
        session
            .reply(ReplyCode::FileUnavailable, "Permission denied")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    if core_fs::is_dir(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "Is a directory")
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

    let guard = session.locks().acquire_exclusive(&resolved.physical).await;

    // Append point, revalidated under the lock. Missing file starts
    // empty.
    let offset = core_fs::size(&resolved.physical).await.unwrap_or(0);
    if offset == 0 && core_fs::truncate(&resolved.physical, 0).await.is_err() {
        session
            .reply(
                ReplyCode::LocalError,
                "Requested action aborted. Local error in processing",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let ascii = session.transfer_type() == TransferType::Ascii;

    session
        .reply(ReplyCode::FileStatusOkay, "Ok to append data")
        .await?;

    let Some(data) = open_data_or_reply(&session).await? else {
        return Ok(CommandOutcome::Done);
    };

    let task = TransferTask {
        kind: TransferKind::RecvFile,
        path: resolved.physical,
        offset,
        ascii,
        lock: Some(LockGuard::Exclusive(guard)),
    };

    if session.start_transfer(data, task).is_err() {
        session
            .reply(ReplyCode::TransientFileError, "Transfer already in progress")
            .await?;
    }

    Ok(CommandOutcome::Done)
}
