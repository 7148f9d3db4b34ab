//! Shared helpers for the command handlers.

use crate::constants::DATA_CHANNEL_TIMEOUT_MS;
use crate::core_protocol::ReplyCode;
use crate::session::{Session, SessionState};
use log::warn;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Gate for commands that need a logged-in user. Replies 530 before
/// login and 503 while a PASS is outstanding; returns whether the
/// handler may proceed.
pub async fn require_authenticated(session: &Session) -> io::Result<bool> {
    match session.state() {
        SessionState::Authenticated => Ok(true),
        SessionState::AwaitingPassword => {
            session
                .reply(ReplyCode::BadCommandSequence, "Complete login with PASS first")
                .await?;
            Ok(false)
        }
        _ => {
            session
                .reply(ReplyCode::NotLoggedIn, "Please login with USER and PASS")
                .await?;
            Ok(false)
        }
    }
}

/// Opens the negotiated data connection with the standard timeout. On
/// failure the 425 is already sent and `None` comes back; the caller
/// just unwinds (dropping any lock it holds).
pub async fn open_data_or_reply(session: &Session) -> io::Result<Option<TcpStream>> {
    match session
        .open_data_channel(Duration::from_millis(DATA_CHANNEL_TIMEOUT_MS))
        .await
    {
        Ok(stream) => Ok(Some(stream)),
        Err(err) => {
            warn!(
                "Could not establish data connection for {}:{}: {}",
                session.peer_ip(),
                session.peer_port(),
                err
            );
            session
                .reply(ReplyCode::CantOpenDataConnection, "Can't open data connection")
                .await?;
            Ok(None)
        }
    }
}
