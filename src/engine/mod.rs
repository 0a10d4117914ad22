//! The IRC protocol engine.
//!
//! One [`Engine`] owns the protocol state of a single client connection:
//! the registration handshake, capability negotiation, SASL, joined
//! channels, and batch serials. It is transport-agnostic; incoming
//! [`Message`]s are fed to [`Engine::handle`] and replies are pushed into
//! an outgoing queue the connection driver drains. Everything that needs
//! the chat backend goes through the [`Backend`] trait.

mod backend;
mod caps;
mod commands;
pub mod replies;
mod sasl;

pub use backend::{Backend, HistoryMessage, ListEntry, Login, WhoisReply};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use snowgate_proto::{server_time, Message, Prefix};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::EngineError;

/// Capabilities the gateway advertises, with their LS values.
pub const SUPPORTED_CAPS: &[(&str, Option<&str>)] = &[
    ("echo-message", None),
    ("server-time", None),
    ("message-tags", None),
    ("sasl", Some("PLAIN")),
    ("batch", None),
    ("draft/chathistory", None),
];

fn supported_caps_string() -> String {
    SUPPORTED_CAPS
        .iter()
        .map(|(name, value)| match value {
            Some(value) => format!("{}={}", name, value),
            None => (*name).to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Credentials extracted from a completed SASL PLAIN exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaslCredentials {
    pub authzid: String,
    pub authcid: String,
    pub password: String,
}

/// Protocol state for one client connection.
pub struct Engine<B: Backend> {
    backend: B,
    out: mpsc::UnboundedSender<Message>,
    server_prefix: Prefix,
    client_prefix: Prefix,
    caps: HashSet<String>,
    channels: HashSet<String>,
    nickname: String,
    username: String,
    realname: String,
    password: String,
    sasl: Option<SaslCredentials>,
    sasl_buf: Vec<u8>,
    registered: bool,
    cap_blocked: bool,
    sasl_blocked: bool,
    batch_serial: u64,
}

impl<B: Backend> Engine<B> {
    pub fn new(
        backend: B,
        out: mpsc::UnboundedSender<Message>,
        server_name: &str,
        client_host: &str,
    ) -> Self {
        Engine {
            backend,
            out,
            server_prefix: Prefix::ServerName(server_name.to_owned()),
            client_prefix: Prefix::new("*", "", client_host),
            caps: HashSet::new(),
            channels: HashSet::new(),
            nickname: String::new(),
            username: String::new(),
            realname: String::new(),
            password: String::new(),
            sasl: None,
            sasl_buf: Vec::new(),
            registered: false,
            cap_blocked: false,
            sasl_blocked: false,
            batch_serial: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn server_prefix(&self) -> &Prefix {
        &self.server_prefix
    }

    pub fn client_prefix(&self) -> &Prefix {
        &self.client_prefix
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.caps.contains(cap)
    }

    pub fn in_channel(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn sasl(&self) -> Option<&SaslCredentials> {
        self.sasl.as_ref()
    }

    /// The nick to address replies to: the registered nick, the nick in
    /// flight during registration, or `*` before one is known.
    pub fn display_nick(&self) -> &str {
        if self.registered {
            self.client_prefix.name()
        } else if !self.nickname.is_empty() {
            &self.nickname
        } else {
            "*"
        }
    }

    fn send(&self, msg: Message) -> Result<(), EngineError> {
        self.out.send(msg)?;
        Ok(())
    }

    fn next_batch(&mut self) -> String {
        self.batch_serial += 1;
        self.batch_serial.to_string()
    }

    fn expect_params(
        &self,
        msg: &Message,
        min: usize,
        max: Option<usize>,
    ) -> Result<(), EngineError> {
        if msg.params.len() < min {
            return Err(EngineError::NeedMoreParams(msg.command.clone()));
        }
        if let Some(max) = max {
            if msg.params.len() > max {
                return Err(EngineError::InvalidParams(msg.command.clone()));
            }
        }
        Ok(())
    }

    /// Handle one client command.
    ///
    /// Protocol violations come back as non-fatal [`EngineError`]s the
    /// driver reports to the client; fatal errors mean the connection is
    /// done.
    pub async fn handle(&mut self, msg: &Message) -> Result<(), EngineError> {
        debug!(command = %msg.command, "client command");
        match msg.command.as_str() {
            "CAP" => self.handle_cap(msg).await,
            "AUTHENTICATE" => self.handle_authenticate(msg).await,
            "PASS" => self.handle_pass(msg).await,
            "NICK" => self.handle_nick(msg).await,
            "USER" => self.handle_user(msg).await,
            "PING" => self.handle_ping(msg).await,
            "JOIN" | "PRIVMSG" | "LIST" | "WHOIS" | "CHATHISTORY" | "TAGMSG"
                if !self.registered =>
            {
                Err(EngineError::NotRegistered(msg.command.clone()))
            }
            "JOIN" => self.handle_join(msg).await,
            "PRIVMSG" => self.handle_privmsg(msg).await,
            "LIST" => self.handle_list(msg).await,
            "WHOIS" => self.handle_whois(msg).await,
            "CHATHISTORY" => self.handle_chathistory(msg).await,
            "TAGMSG" => self.handle_tagmsg(msg).await,
            _ => Err(EngineError::UnknownCommand(msg.command.clone())),
        }
    }

    /// Complete registration once every prerequisite is in.
    ///
    /// Safe to call after every registration-time command; does nothing
    /// until nick, user, and realname are set and no CAP or SASL exchange
    /// is in flight.
    pub(super) async fn maybe_complete_registration(&mut self) -> Result<(), EngineError> {
        if self.registered
            || self.nickname.is_empty()
            || self.username.is_empty()
            || self.realname.is_empty()
            || self.cap_blocked
            || self.sasl_blocked
        {
            return Ok(());
        }

        let login = Login {
            password: self.password.clone(),
            sasl: self.sasl.clone(),
        };
        if let Some(prefix) = self.backend.handle_register(&login).await? {
            self.client_prefix = prefix;
        } else {
            let nickname = self.nickname.clone();
            self.client_prefix.set_nick(nickname);
        }
        self.registered = true;
        debug!(nick = %self.client_prefix.name(), "registration complete");

        let network = self.backend.network_name().await?;
        let server_name = self.backend.server_name().await?;
        let version = self.backend.server_version().await?;
        let created = self.backend.server_created().await?;
        let nick = self.client_prefix.name().to_owned();

        self.send(replies::welcome(&self.server_prefix, &nick, &network))?;
        self.send(replies::your_host(
            &self.server_prefix,
            &nick,
            &server_name,
            &version,
        ))?;
        self.send(replies::created(&self.server_prefix, &nick, created))?;

        self.send(replies::motd_start(&self.server_prefix, &nick, &server_name))?;
        for line in self.backend.motd().await? {
            self.send(replies::motd_line(&self.server_prefix, &nick, &line))?;
        }
        self.send(replies::end_of_motd(&self.server_prefix, &nick))
    }

    /// Deliver a backend-originated message to the client.
    ///
    /// Content is split into one PRIVMSG per line; tags follow negotiated
    /// capabilities.
    pub fn push_message(&self, msg: &HistoryMessage) -> Result<(), EngineError> {
        self.push_message_batched(msg, None)
    }

    fn push_message_batched(
        &self,
        msg: &HistoryMessage,
        batch: Option<&str>,
    ) -> Result<(), EngineError> {
        for line in msg.content.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let mut out = replies::privmsg(&msg.author, &msg.channel, line);
            if self.has_capability("server-time") {
                out = out.with_tag("time", Some(server_time(msg.date)));
            }
            if self.has_capability("message-tags") && !msg.id.is_empty() {
                out = out.with_tag("msgid", Some(msg.id.clone()));
            }
            if let Some(batch) = batch {
                out = out.with_tag("batch", Some(batch.to_owned()));
            }
            self.send(out)?;
        }
        Ok(())
    }

    /// Deliver a typing notification; a no-op unless the client asked for
    /// message-tags.
    pub fn push_typing(
        &self,
        author: &Prefix,
        channel: &str,
        t: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !self.has_capability("message-tags") {
            return Ok(());
        }
        let mut msg = replies::tagmsg_typing(author, channel);
        if self.has_capability("server-time") {
            msg = msg.with_tag("time", Some(server_time(t)));
        }
        self.send(msg)
    }

    /// Deliver a nick change. Updates the client's own prefix when the
    /// rename is their own.
    pub fn push_nick_change(&mut self, old: &Prefix, new_nick: &str) -> Result<(), EngineError> {
        self.send(replies::nick_change(old, new_nick))?;
        if old.name() == self.client_prefix.name() {
            self.client_prefix.set_nick(new_nick);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
