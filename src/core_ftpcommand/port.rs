use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{self, ParsedCommand, ReplyCode};
use crate::session::Session;
use log::debug;
use std::io;

/// Handles the PORT command: records the client's address for a later
/// active-mode connect. Any previously negotiated data resources are
/// dropped first.
pub async fn handle_port(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let (ip, port) = match core_protocol::parse_port(&cmd.argument) {
        Ok(parsed) => parsed,
        Err(_) => {
            session
                .reply(ReplyCode::ParameterSyntaxError, "Invalid PORT parameters")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    session.close_data_channel();
    session.set_active(ip.to_string(), port);
    debug!("PORT mode set: {}:{}", ip, port);

    session
        .reply(ReplyCode::CommandOkay, "PORT command successful")
        .await?;
    Ok(CommandOutcome::Done)
}
