//! Parse errors for the IRC message model.

use thiserror::Error;

/// Errors produced when parsing a raw IRC line into a [`Message`].
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
    #[error("empty message")]
    EmptyMessage,

    #[error("message has a prefix or tags but no command")]
    MissingCommand,

    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    #[error("invalid prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("line exceeds the maximum length ({0} bytes)")]
    LineTooLong(usize),
}
