//! Protocol engine errors and their IRC representations.

use snowgate_proto::{Message, Prefix};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::BackendError;

/// Errors raised while handling a client command.
///
/// Protocol errors are reported to the client as IRC replies and the
/// connection continues; fatal errors tear the connection down.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not enough parameters for {0}")]
    NeedMoreParams(String),

    #[error("invalid parameters for {0}")]
    InvalidParams(String),

    #[error("already registered")]
    AlreadyRegistered,

    #[error("{0} requires registration")]
    NotRegistered(String),

    #[error("SASL authentication failed: {0}")]
    SaslFail(String),

    #[error("CHATHISTORY {subcommand} rejected: {reason}")]
    HistoryFail { subcommand: String, reason: String },

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("client connection closed")]
    Closed(#[from] mpsc::error::SendError<Message>),
}

impl EngineError {
    /// Whether the connection should be torn down rather than continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Backend(e) => !e.is_not_found(),
            EngineError::Closed(_) => true,
            _ => false,
        }
    }

    /// The IRC reply reporting this error, if it has one.
    ///
    /// Fatal errors have no reply; the connection driver sends a final
    /// ERROR line instead.
    pub fn to_irc_reply(&self, server: &Prefix, nick: &str) -> Option<Message> {
        let nick = if nick.is_empty() { "*" } else { nick };
        let msg = match self {
            EngineError::NeedMoreParams(cmd) | EngineError::InvalidParams(cmd) => Message::new(
                "461",
                vec![
                    nick.to_owned(),
                    cmd.clone(),
                    "Not enough parameters".to_owned(),
                ],
            ),
            EngineError::AlreadyRegistered => Message::new(
                "462",
                vec![nick.to_owned(), "You may not reregister".to_owned()],
            ),
            EngineError::NotRegistered(_) => Message::new(
                "451",
                vec![nick.to_owned(), "You have not registered".to_owned()],
            ),
            EngineError::SaslFail(reason) => Message::new(
                "904",
                vec![
                    nick.to_owned(),
                    format!("SASL authentication failed: {}", reason),
                ],
            ),
            EngineError::HistoryFail { subcommand, reason } => Message::new(
                "FAIL",
                vec![
                    "CHATHISTORY".to_owned(),
                    "INVALID_PARAMS".to_owned(),
                    subcommand.clone(),
                    reason.clone(),
                ],
            ),
            EngineError::UnknownCommand(cmd) => Message::new(
                "421",
                vec![nick.to_owned(), cmd.clone(), "Unknown command".to_owned()],
            ),
            EngineError::Backend(BackendError::NoSuchChannel(name)) => Message::new(
                "403",
                vec![nick.to_owned(), name.clone(), "No such channel".to_owned()],
            ),
            EngineError::Backend(BackendError::NoSuchUser(name)) => Message::new(
                "401",
                vec![
                    nick.to_owned(),
                    name.clone(),
                    "No such nick/channel".to_owned(),
                ],
            ),
            EngineError::Backend(BackendError::NoSuchGuild(id)) => Message::new(
                "403",
                vec![nick.to_owned(), id.to_string(), "No such channel".to_owned()],
            ),
            EngineError::Backend(_) | EngineError::Closed(_) => return None,
        };
        Some(msg.with_prefix(server.clone()))
    }
}
