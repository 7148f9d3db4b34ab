use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{self, ParsedCommand, ReplyCode};
use crate::session::Session;
use log::{debug, error};
use std::io;
use std::net::IpAddr;

/// Handles the PASV command: binds a listener in the passive port range
/// and advertises the control connection's local address to the client.
pub async fn handle_pasv(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "PASV does not take parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let IpAddr::V4(advertise_ip) = session.local_ip() else {
        session
            .reply(ReplyCode::LocalError, "Passive mode requires IPv4")
            .await?;
        return Ok(CommandOutcome::Done);
    };

    session.close_data_channel();

    let port = match session.set_passive() {
        Ok(port) => port,
        Err(err) => {
            error!("Failed to enter passive mode: {}", err);
            session
                .reply(ReplyCode::LocalError, "Failed to enter passive mode")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    debug!("PASV mode: {}:{}", advertise_ip, port);
    session
        .send_raw(&core_protocol::format_pasv_response(advertise_ip, port))
        .await?;
    Ok(CommandOutcome::Done)
}
