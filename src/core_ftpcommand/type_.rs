use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{self, ParsedCommand, ReplyCode, TransferType};
use crate::session::Session;
use std::io;

/// Handles the TYPE command. ASCII and binary are honored; EBCDIC is
/// parsed but rejected with 504.
pub async fn handle_type(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let transfer_type = match core_protocol::parse_type(&cmd.argument) {
        Ok(t) => t,
        Err(_) => {
            session
                .reply(ReplyCode::ParameterSyntaxError, "Invalid type parameter")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    if transfer_type == TransferType::Ebcdic {
        session
            .reply(
                ReplyCode::CommandNotImplementedForParameter,
                "Type not supported (EBCDIC not supported)",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session.set_transfer_type(transfer_type);

    let name = if transfer_type == TransferType::Ascii { "A" } else { "I" };
    session
        .reply(ReplyCode::CommandOkay, &format!("Type set to {}", name))
        .await?;
    Ok(CommandOutcome::Done)
}
