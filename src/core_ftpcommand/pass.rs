use super::handlers::CommandOutcome;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::{Session, SessionState};
use log::warn;
use std::io;

/// Handles the PASS command. Only valid straight after USER.
pub async fn handle_pass(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if session.state() != SessionState::AwaitingPassword {
        session
            .reply(ReplyCode::BadCommandSequence, "Login with USER first")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    // An empty password is legal (anonymous logins often send none).
    let password = cmd.argument.as_str();
    let username = session.username();

    if session.authenticate(password).await {
        session
            .reply(ReplyCode::UserLoggedIn, "User logged in, proceed")
            .await?;
    } else {
        warn!(
            "Authentication failed for user '{}' from {}:{}",
            username,
            session.peer_ip(),
            session.peer_port()
        );
        session.reply(ReplyCode::NotLoggedIn, "Login incorrect").await?;
    }

    Ok(CommandOutcome::Done)
}
