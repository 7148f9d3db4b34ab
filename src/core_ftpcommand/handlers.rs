//! The command registry: verb → (preflight, handler), dispatched in
//! registration order. Registration is idempotent by verb.

use crate::core_protocol::{ParsedCommand, ReplyCode};
use crate::session::Session;
use log::debug;
use std::future::Future;
use std::io;
use std::pin::Pin;

/// What a handler tells the command loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The handler replied; keep reading commands.
    Done,
    /// QUIT: the 221 has been flushed, close the control connection.
    Quit,
}

/// Latent-state cleanup run before a handler. Preflight never does
/// permission checks; it only clears REST/RNFR state that a previous
/// command left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    /// Clear both the restart offset and any pending rename source.
    ClearBoth,
    /// Clear only the pending rename source (REST/STOR/RETR keep the
    /// restart offset alive).
    ClearRename,
    /// Clear only the restart offset (RNTO keeps the rename source).
    ClearRestart,
}

impl Preflight {
    pub fn run(&self, session: &Session) {
        match self {
            Preflight::ClearBoth => {
                session.clear_rest();
                session.clear_rename_from();
            }
            Preflight::ClearRename => session.clear_rename_from(),
            Preflight::ClearRestart => session.clear_rest(),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = io::Result<CommandOutcome>> + Send>>;
type HandlerFn = Box<dyn Fn(Session, ParsedCommand) -> HandlerFuture + Send + Sync>;

pub struct CommandEntry {
    pub verb: &'static str,
    pub preflight: Option<Preflight>,
    handler: HandlerFn,
}

/// Insertion-order-stable verb table. Built once at startup and shared
/// read-only between all sessions.
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

impl CommandRegistry {
    /// Registers every standard handler. The preflight assignments are
    /// part of the protocol behavior (they decide which commands keep
    /// REST/RNFR state alive) and are covered by tests.
    pub fn standard() -> Self {
        use super::*;
        let mut registry = CommandRegistry {
            entries: Vec::new(),
        };

        registry.register("USER", Some(Preflight::ClearBoth), user::handle_user);
        registry.register("PASS", Some(Preflight::ClearBoth), pass::handle_pass);
        registry.register("ACCT", Some(Preflight::ClearBoth), acct::handle_acct);
        registry.register("CWD", Some(Preflight::ClearBoth), cwd::handle_cwd);
        registry.register("CDUP", Some(Preflight::ClearBoth), cdup::handle_cdup);
        registry.register("SMNT", Some(Preflight::ClearBoth), smnt::handle_smnt);

        registry.register("QUIT", Some(Preflight::ClearBoth), quit::handle_quit);
        registry.register("REIN", Some(Preflight::ClearBoth), rein::handle_rein);

        registry.register("PORT", Some(Preflight::ClearBoth), port::handle_port);
        registry.register("PASV", Some(Preflight::ClearBoth), pasv::handle_pasv);
        registry.register("TYPE", Some(Preflight::ClearBoth), type_::handle_type);
        registry.register("STRU", Some(Preflight::ClearBoth), stru::handle_stru);
        registry.register("MODE", Some(Preflight::ClearBoth), mode::handle_mode);

        registry.register("REST", Some(Preflight::ClearRename), rest::handle_rest);
        registry.register("STOR", Some(Preflight::ClearRename), stor::handle_stor);
        registry.register("RETR", Some(Preflight::ClearRename), retr::handle_retr);
        registry.register("APPE", Some(Preflight::ClearBoth), appe::handle_appe);
        registry.register("LIST", Some(Preflight::ClearBoth), list::handle_list);
        registry.register("NLST", Some(Preflight::ClearBoth), nlst::handle_nlst);
        registry.register("RNFR", Some(Preflight::ClearBoth), rnfr::handle_rnfr);
        registry.register("RNTO", Some(Preflight::ClearRestart), rnto::handle_rnto);
        registry.register("DELE", Some(Preflight::ClearBoth), dele::handle_dele);
        registry.register("RMD", Some(Preflight::ClearBoth), rmd::handle_rmd);
        registry.register("MKD", Some(Preflight::ClearBoth), mkd::handle_mkd);
        registry.register("PWD", Some(Preflight::ClearBoth), pwd::handle_pwd);
        registry.register("ABOR", Some(Preflight::ClearBoth), abor::handle_abor);

        registry.register("SYST", Some(Preflight::ClearBoth), syst::handle_syst);
        registry.register("NOOP", None, noop::handle_noop);

        registry.register("SIZE", Some(Preflight::ClearBoth), size::handle_size);
        registry.register("MDTM", Some(Preflight::ClearBoth), mdtm::handle_mdtm);
        registry.register("FEAT", Some(Preflight::ClearBoth), feat::handle_feat);

        registry
    }

    pub fn register<F, Fut>(&mut self, verb: &'static str, preflight: Option<Preflight>, handler: F)
    where
        F: Fn(Session, ParsedCommand) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<CommandOutcome>> + Send + 'static,
    {
        let handler: HandlerFn = Box::new(move |session, cmd| Box::pin(handler(session, cmd)));

        if let Some(existing) = self.entries.iter_mut().find(|e| e.verb == verb) {
            existing.preflight = preflight;
            existing.handler = handler;
            return;
        }

        self.entries.push(CommandEntry {
            verb,
            preflight,
            handler,
        });
    }

    pub fn entry(&self, verb: &str) -> Option<&CommandEntry> {
        self.entries.iter().find(|e| e.verb == verb)
    }

    pub fn preflight_of(&self, verb: &str) -> Option<Preflight> {
        self.entry(verb).and_then(|e| e.preflight)
    }

    pub fn is_registered(&self, verb: &str) -> bool {
        self.entry(verb).is_some()
    }

    pub fn verbs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.verb)
    }

    /// Resolves the verb and runs preflight + handler. Unknown verbs get
    /// a 502 without touching any session state.
    pub async fn dispatch(
        &self,
        session: &Session,
        cmd: &ParsedCommand,
    ) -> io::Result<CommandOutcome> {
        let Some(entry) = self.entry(&cmd.verb) else {
            debug!("No handler registered for {}", cmd.verb);
            session
                .reply(ReplyCode::CommandNotImplemented, "Command not implemented")
                .await?;
            return Ok(CommandOutcome::Done);
        };

        if let Some(preflight) = &entry.preflight {
            preflight.run(session);
        }

        (entry.handler)(session.clone(), cmd.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_table_matches_protocol_contract() {
        let registry = CommandRegistry::standard();

        for verb in [
            "USER", "PASS", "ACCT", "CWD", "CDUP", "SMNT", "QUIT", "REIN", "PORT", "PASV",
            "TYPE", "STRU", "MODE", "APPE", "LIST", "NLST", "DELE", "RMD", "MKD", "PWD", "ABOR",
            "SYST",
        ] {
            assert_eq!(
                registry.preflight_of(verb),
                Some(Preflight::ClearBoth),
                "verb {}",
                verb
            );
        }

        for verb in ["REST", "STOR", "RETR"] {
            assert_eq!(
                registry.preflight_of(verb),
                Some(Preflight::ClearRename),
                "verb {}",
                verb
            );
        }

        assert_eq!(registry.preflight_of("RNTO"), Some(Preflight::ClearRestart));
        assert_eq!(registry.preflight_of("NOOP"), None);
    }

    #[test]
    fn all_supported_verbs_are_registered() {
        let registry = CommandRegistry::standard();
        for verb in [
            "USER", "PASS", "ACCT", "CWD", "CDUP", "SMNT", "QUIT", "REIN", "PORT", "PASV",
            "TYPE", "STRU", "MODE", "REST", "STOR", "RETR", "APPE", "LIST", "NLST", "DELE",
            "RMD", "MKD", "PWD", "ABOR", "SYST", "NOOP", "SIZE", "MDTM", "FEAT", "RNFR", "RNTO",
        ] {
            assert!(registry.is_registered(verb), "verb {}", verb);
        }

        // Declared-but-unregistered extensions take the 502 path.
        for verb in ["STOU", "SITE", "HELP", "STAT", "ALLO"] {
            assert!(!registry.is_registered(verb), "verb {}", verb);
        }
    }

    #[test]
    fn registration_is_idempotent_by_verb() {
        let mut registry = CommandRegistry::standard();
        let count = registry.verbs().count();

        registry.register("NOOP", Some(Preflight::ClearBoth), super::super::noop::handle_noop);
        assert_eq!(registry.verbs().count(), count);
        assert_eq!(registry.preflight_of("NOOP"), Some(Preflight::ClearBoth));
    }
}
