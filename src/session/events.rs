//! Events fanned out from a session to its listeners.

use chrono::{DateTime, Utc};

use crate::backend::Snowflake;

/// A user as listeners see them: resolved names plus the backing id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventUser {
    pub nickname: String,
    pub username: String,
    pub id: Snowflake,
}

/// A rendered message ready for IRC delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel: String,
    pub content: String,
    pub id: String,
    pub author: EventUser,
    pub date: DateTime<Utc>,
}

/// Someone started typing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingEvent {
    pub channel: String,
    pub user: EventUser,
    pub date: DateTime<Utc>,
}

/// A user's resolved nickname changed, within one guild scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NickChangeEvent {
    pub guild: Option<Snowflake>,
    pub id: Snowflake,
    pub old: String,
    pub new: String,
}

/// One event delivered to session listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Message(MessageEvent),
    Typing(TypingEvent),
    NickChange(NickChangeEvent),
}
