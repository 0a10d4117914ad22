//! The capability surface the protocol engine drives.
//!
//! The engine never talks to the chat backend directly; everything it
//! needs is expressed through [`Backend`]. The connection glue implements
//! this trait on top of a shared session, and engine tests implement it
//! in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snowgate_proto::Prefix;

use super::SaslCredentials;
use crate::backend::BackendError;

/// Credentials gathered before registration completes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Login {
    pub password: String,
    pub sasl: Option<SaslCredentials>,
}

impl Login {
    /// The credential to authenticate with. SASL wins over PASS when the
    /// client supplied both.
    pub fn token(&self) -> &str {
        match &self.sasl {
            Some(sasl) => &sasl.password,
            None => &self.password,
        }
    }
}

/// One row of a LIST reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub channel: String,
    pub users: usize,
    pub topic: String,
}

/// Everything a WHOIS reply needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhoisReply {
    pub prefix: Prefix,
    pub realname: String,
    pub server: String,
    pub server_info: String,
    pub is_operator: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub channels: Vec<String>,
}

/// One message delivered to the client, from history or live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryMessage {
    pub channel: String,
    pub content: String,
    pub id: String,
    pub author: Prefix,
    pub date: DateTime<Utc>,
}

/// Operations the engine delegates to whatever sits behind it.
///
/// Methods are not called before registration completes unless noted.
/// Registration-time handlers return the value the engine should store,
/// which lets the implementation normalize what the client sent.
#[async_trait]
pub trait Backend: Send {
    async fn network_name(&mut self) -> Result<String, BackendError>;
    async fn server_name(&mut self) -> Result<String, BackendError>;
    async fn server_version(&mut self) -> Result<String, BackendError>;
    async fn server_created(&mut self) -> Result<DateTime<Utc>, BackendError>;
    async fn motd(&mut self) -> Result<Vec<String>, BackendError>;

    /// During registration.
    async fn handle_nickname(&mut self, nickname: &str) -> Result<String, BackendError>;
    /// During registration.
    async fn handle_username(&mut self, username: &str) -> Result<String, BackendError>;
    /// During registration.
    async fn handle_realname(&mut self, realname: &str) -> Result<String, BackendError>;
    /// During registration.
    async fn handle_password(&mut self, password: &str) -> Result<String, BackendError>;
    /// Allowed before registration.
    async fn handle_ping(&mut self, nonce: &str) -> Result<String, BackendError>;
    /// Called exactly once, when registration prerequisites are met.
    ///
    /// Returns the client prefix to adopt, if the backend assigns one.
    async fn handle_register(&mut self, login: &Login) -> Result<Option<Prefix>, BackendError>;

    async fn handle_join(&mut self, channel: &str) -> Result<(), BackendError>;
    async fn handle_topic(&mut self, channel: &str) -> Result<String, BackendError>;
    async fn handle_creation_time(
        &mut self,
        channel: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError>;
    async fn handle_names(&mut self, channel: &str) -> Result<Vec<String>, BackendError>;
    async fn handle_message(&mut self, channel: &str, content: &str)
        -> Result<(), BackendError>;
    async fn handle_list(&mut self) -> Result<Vec<ListEntry>, BackendError>;
    async fn handle_whois(&mut self, user: &str) -> Result<WhoisReply, BackendError>;

    async fn handle_history_before(
        &mut self,
        target: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;
    async fn handle_history_after(
        &mut self,
        target: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;
    async fn handle_history_latest(
        &mut self,
        target: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;
    async fn handle_history_around(
        &mut self,
        target: &str,
        around: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;
    async fn handle_history_between(
        &mut self,
        target: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;

    async fn handle_typing_active(&mut self, channel: &str) -> Result<(), BackendError>;
    async fn handle_typing_paused(&mut self, channel: &str) -> Result<(), BackendError>;
    async fn handle_typing_done(&mut self, channel: &str) -> Result<(), BackendError>;
}
