use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::info;
use std::io;

/// Handles the ABOR command.
///
/// With a transfer in flight the handler only flags the abort and wakes
/// the worker; the worker then emits the 426/226 pair on the control
/// channel. With nothing in flight any residual data resources are
/// dropped and a 225 goes out directly.
pub async fn handle_abor(session: Session, _cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if session.request_abort() {
        info!(
            "Abort requested by {}:{}",
            session.peer_ip(),
            session.peer_port()
        );
        return Ok(CommandOutcome::Done);
    }

    session.close_data_channel();
    session
        .reply(ReplyCode::DataConnectionOpen, "No transfer in progress")
        .await?;
    Ok(CommandOutcome::Done)
}
