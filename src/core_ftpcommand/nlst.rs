use super::handlers::CommandOutcome;
use super::utils::{open_data_or_reply, require_authenticated};
use crate::core_auth::Permissions;
use crate::core_fs;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::core_transfer::{TransferKind, TransferTask};
use crate::session::Session;
use std::io;

/// Handles the NLST command: bare names, one per line.
pub async fn handle_nlst(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    let target = if cmd.has_argument {
        cmd.argument.clone()
    } else {
        session.current_dir()
    };

    let resolved = match session.resolve_path(&target) {
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

    if !core_fs::is_dir(&resolved.physical).await {
        session
            .reply(ReplyCode::FileUnavailable, "Not a directory")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session
        .reply(ReplyCode::FileStatusOkay, "Here comes the name list")
        .await?;

    let Some(data) = open_data_or_reply(&session).await? else {
        return Ok(CommandOutcome::Done);
    };

    let task = TransferTask {
        kind: TransferKind::SendNlst,
        path: resolved.physical,
        offset: 0,
        ascii: false,
        lock: None,
    };

    if session.start_transfer(data, task).is_err() {
        session
            .reply(ReplyCode::TransientFileError, "Transfer already in progress")
            .await?;
    }

    Ok(CommandOutcome::Done)
}
