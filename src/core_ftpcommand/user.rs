use super::handlers::CommandOutcome;
use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::{info, warn};
use std::io;

/// Handles the USER command: checks the name against the user database
/// (or the anonymous policy) and moves the session to waiting-for-password.
/// Sending USER again at any point restarts the login flow.
pub async fn handle_user(session: Session, cmd: ParsedCommand) -> io::Result<CommandOutcome> {
    if !cmd.has_argument {
        session
            .reply(ReplyCode::ParameterSyntaxError, "Syntax error in parameters")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    let username = cmd.argument.as_str();
    let is_anonymous = username == "anonymous";

    if !is_anonymous && !session.users().user_exists(username) {
        warn!(
            "User '{}' not found from {}:{}",
            username,
            session.peer_ip(),
            session.peer_port()
        );
        session.reply(ReplyCode::NotLoggedIn, "User not found").await?;
        return Ok(CommandOutcome::Done);
    }

    if is_anonymous && !session.users().user_exists(username) && !session.users().anonymous_enabled()
    {
        warn!(
            "Anonymous login disabled, rejected from {}:{}",
            session.peer_ip(),
            session.peer_port()
        );
        session
            .reply(ReplyCode::NotLoggedIn, "Anonymous login not allowed")
            .await?;
        return Ok(CommandOutcome::Done);
    }

    session.set_user(username);
    info!(
        "User '{}' from {}:{}",
        username,
        session.peer_ip(),
        session.peer_port()
    );

    if is_anonymous {
        session
            .reply(
                ReplyCode::NeedPassword,
                "Anonymous login OK, send your email as password",
            )
            .await?;
    } else {
        session
            .reply(ReplyCode::NeedPassword, "Username OK, need password")
            .await?;
    }

    Ok(CommandOutcome::Done)
}
