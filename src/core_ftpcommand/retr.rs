use super::handlers::CommandOutcome;
use super::utils::{open_data_or_reply, require_authenticated};
use crate::core_auth::Permissions;
use crate::core_filelock::LockGuard;
use crate::core_protocol::{ParsedCommand, ReplyCode, TransferType};
use crate::core_transfer::{TransferKind, TransferTask};
use crate::session::Session;
use crate::core_fs;
use log::{debug, warn};
use std::io;

/// Handles the RETR command.
///
/// The file is checked and the shared lock acquired before the 150 goes
/// out; the lock, the data socket and the validated restart offset are
/// then handed to the transfer worker, which owns the final reply.
pub async fn handle_retr(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
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

    // Courtesy check so a contended file gets a readable 450 instead of
    // a silent wait. The acquire below is what actually serializes.
    if session.locks().is_exclusive_locked(&resolved.physical) {
        session
            .reply(
                ReplyCode::TransientFileError,
                "File is currently being written to, please try again later",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let guard = session.locks().acquire_shared(&resolved.physical).await;

    // Revalidate under the lock; the file may have moved underneath us.
    let size = match core_fs::size(&resolved.physical).await {
        Ok(size) => size,
        Err(_) => {
            session
                .reply(ReplyCode::FileUnavailable, "File not found")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    let offset = session.take_rest();
    if offset > size {
        warn!("Restart offset {} exceeds file size {}", offset, size);
        session
            .reply(ReplyCode::FileUnavailable, "Restart offset beyond file size")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let ascii = session.transfer_type() == TransferType::Ascii;
    debug!(
        "RETR {:?} (size {}, offset {}, ascii {})",
        resolved.physical, size, offset, ascii
    );

    session
        .reply(ReplyCode::FileStatusOkay, "Opening data connection")
        .await?;

    let Some(data) = open_data_or_reply(&session).await? else {
        return Ok(CommandOutcome::Done);
    };

    let task = TransferTask {
        kind: TransferKind::SendFile,
        path: resolved.physical,
        offset,
        ascii,
        lock: Some(LockGuard::Shared(guard)),
    };

    if session.start_transfer(data, task).is_err() {
        session
            .reply(ReplyCode::TransientFileError, "Transfer already in progress")
            .await?;
    }

    Ok(CommandOutcome::Done)
}
