use super::handlers::CommandOutcome;
use super::utils::{open_data_or_reply, require_authenticated};
use crate::core_auth::Permissions;
use crate::core_fs::{self, resolver};
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::core_transfer::{TransferKind, TransferTask};
use crate::session::Session;
use std::io;
use std::path::PathBuf;

/// Handles the LIST command. Without an argument the current directory
/// is listed. A file argument lists just that file, rendered from its
/// parent directory, since common clients issue `LIST filename`.
pub async fn handle_list(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    // Clients routinely pass ls-style flags; drop them.
    let target = cmd
        .argument
        .split_whitespace()
        .find(|tok| !tok.starts_with('-'))
        .unwrap_or("")
        .to_string();
    let target = if target.is_empty() {
        session.current_dir()
    } else {
        target
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

    let (dir, name_filter): (PathBuf, Option<String>) =
        if core_fs::is_dir(&resolved.physical).await {
            (resolved.physical.clone(), None)
        } else if core_fs::exists(&resolved.physical).await {
            let name = resolver::virtual_filename(&resolved.virtual_path).to_string();
            let parent = core_fs::parent_of(&resolved.physical)
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| resolved.physical.clone());
            (parent, Some(name))
        } else {
            session
                .reply(ReplyCode::FileUnavailable, "File or directory not found")
                .await?;
            return Ok(CommandOutcome::Done);
        };

    session
        .reply(ReplyCode::FileStatusOkay, "Here comes the directory listing")
        .await?;

    let Some(data) = open_data_or_reply(&session).await? else {
        return Ok(CommandOutcome::Done);
    };

    let task = TransferTask {
        kind: TransferKind::SendList { name_filter },
        path: dir,
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
