//! Backend connection abstraction.
//!
//! A [`Connector`] dials the remote chat backend with a credential token and
//! yields a [`Client`]: one authenticated connection combining a streaming
//! event feed with request/response lookups. The rest of the gateway only
//! ever talks to these traits, so tests substitute an in-memory backend and
//! the wire protocol stays confined to [`wire`].

pub mod types;
pub mod wire;

use async_trait::async_trait;
use thiserror::Error;

pub use types::{
    Account, ChannelInfo, ChatMessage, Event, GuildInfo, GuildSnapshot, Member, Snowflake,
    TypingStart, User,
};

/// Errors from the backend connection.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend rejected the supplied credential.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// A lookup named a channel the backend does not know.
    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    /// A lookup named a user the backend does not know.
    #[error("no such user: {0}")]
    NoSuchUser(String),

    /// A lookup named a guild the account is not a member of.
    #[error("no such guild: {0}")]
    NoSuchGuild(Snowflake),

    /// A request failed for a reason other than a missing entity.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend connection is gone.
    #[error("backend connection closed")]
    Closed,
}

impl BackendError {
    /// Whether this error names a missing entity rather than a broken
    /// connection. Missing entities map to IRC error numerics; everything
    /// else tears the client connection down.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::NoSuchChannel(_)
                | BackendError::NoSuchUser(_)
                | BackendError::NoSuchGuild(_)
        )
    }
}

/// One authenticated backend connection.
///
/// Lookup methods take `&self` and may be called concurrently with event
/// consumption; `next_event` and the subscription methods take `&mut self`
/// because they drive the underlying stream.
#[async_trait]
pub trait Client: Send + Sync {
    /// The account this connection is authenticated as.
    fn account(&self) -> &Account;

    /// Wait for the next pushed event.
    async fn next_event(&mut self) -> Result<Event, BackendError>;

    async fn user(&self, id: Snowflake) -> Result<User, BackendError>;

    async fn member(&self, guild: Snowflake, user: Snowflake) -> Result<Member, BackendError>;

    async fn guild(&self, id: Snowflake) -> Result<GuildInfo, BackendError>;

    async fn channel(&self, id: Snowflake) -> Result<ChannelInfo, BackendError>;

    async fn channels(&self, guild: Snowflake) -> Result<Vec<ChannelInfo>, BackendError>;

    async fn channel_members(&self, channel: Snowflake) -> Result<Vec<Member>, BackendError>;

    async fn send_message(&self, channel: Snowflake, content: &str) -> Result<(), BackendError>;

    async fn messages_before(
        &self,
        channel: Snowflake,
        before: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError>;

    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError>;

    async fn messages_around(
        &self,
        channel: Snowflake,
        around: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError>;

    /// Signal that the account is typing in a channel.
    async fn set_typing(&self, channel: Snowflake) -> Result<(), BackendError>;

    /// Ask the backend to start pushing typing events for a guild.
    async fn subscribe_typing(&mut self, guild: Snowflake) -> Result<(), BackendError>;

    /// Tear the connection down. Further calls fail with [`BackendError::Closed`].
    async fn close(&mut self);
}

/// Dials backend connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate `token` and return a live connection.
    ///
    /// The returned client has already identified itself: `account()` is
    /// populated before this returns.
    async fn connect(&self, token: &str) -> Result<Box<dyn Client>, BackendError>;
}
