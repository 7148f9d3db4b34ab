use super::handlers::CommandOutcome;
use super::utils::require_authenticated;
use crate::core_protocol::{self, DataStructure, ParsedCommand, ReplyCode};
use crate::session::Session;
use log::warn;
use std::io;

/// Handles the STRU command. Only file structure is supported.
pub async fn handle_stru(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !require_authenticated(&session).await? {
        return Ok(CommandOutcome::Done);
    }

    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let structure = match core_protocol::parse_stru(&cmd.argument) {
        Ok(s) => s,
        Err(_) => {
            session
                .reply(ReplyCode::ParameterSyntaxError, "Invalid structure parameter")
                .await?;
            return Ok(CommandOutcome::Done);
        }
    };

    if structure != DataStructure::File {
        warn!("Unsupported structure type requested: {:?}", structure);
        session
            .reply(
                ReplyCode::CommandNotImplementedForParameter,
                "Structure not supported (only File structure)",
            )
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session.set_data_structure(structure);
    session
        .reply(ReplyCode::CommandOkay, "Structure set to File")
        .await?;
    Ok(CommandOutcome::Done)
}
