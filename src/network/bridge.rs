//! Connection glue: the engine's [`Backend`] on top of a shared session.
//!
//! Each client connection owns one [`SessionBackend`]. Before
//! registration it only normalizes input; `handle_register` resolves the
//! login to a session through the registry and attaches. The attached
//! reference is owed back through [`SessionBackend::detach`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snowgate_proto::Prefix;

use crate::backend::{BackendError, Snowflake};
use crate::config::Config;
use crate::engine::{Backend, HistoryMessage, ListEntry, Login, WhoisReply};
use crate::registry::SessionRegistry;
use crate::session::{EventUser, HistoryQuery, MessageEvent, Session};

/// The IRC prefix a backend user appears under.
pub(crate) fn user_prefix(user: &EventUser) -> Prefix {
    Prefix::new(&user.nickname, &user.username, &user.id.to_string())
}

/// Split a login credential into token and optional guild scope.
///
/// The wire format is `token[:guildID]`.
fn parse_login(credential: &str) -> Result<(&str, Option<Snowflake>), BackendError> {
    let (token, guild) = match credential.split_once(':') {
        Some((token, guild)) => {
            let guild = guild
                .parse::<Snowflake>()
                .ok()
                .filter(|g| g.is_valid())
                .ok_or_else(|| BackendError::Auth("malformed guild id in login".to_owned()))?;
            (token, Some(guild))
        }
        None => (credential, None),
    };
    if token.is_empty() {
        return Err(BackendError::Auth("empty login token".to_owned()));
    }
    Ok((token, guild))
}

pub(crate) struct SessionBackend {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    session: Option<Arc<Session>>,
    guild: Option<Snowflake>,
}

impl SessionBackend {
    pub(crate) fn new(config: Arc<Config>, registry: Arc<SessionRegistry>) -> Self {
        SessionBackend {
            config,
            registry,
            session: None,
            guild: None,
        }
    }

    pub(crate) fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub(crate) fn guild(&self) -> Option<Snowflake> {
        self.guild
    }

    /// Release the attached session reference, if any.
    pub(crate) async fn detach(&mut self) {
        if let Some(session) = self.session.take() {
            session.release().await;
        }
    }

    fn attached(&self) -> Result<&Arc<Session>, BackendError> {
        self.session.as_ref().ok_or(BackendError::Closed)
    }

    async fn registered_prefix(
        session: &Arc<Session>,
        guild: Option<Snowflake>,
    ) -> Result<Prefix, BackendError> {
        if let Some(guild) = guild {
            session.validate_guild(guild).await?;
        }
        let nick = session.nick_name(guild).await?;
        let user = session.user_name().await?;
        Ok(Prefix::new(&nick, &user, &session.user_id().to_string()))
    }

    fn to_history(event: MessageEvent) -> HistoryMessage {
        HistoryMessage {
            author: user_prefix(&event.author),
            channel: event.channel,
            content: event.content,
            id: event.id,
            date: event.date,
        }
    }

    async fn history(
        &mut self,
        target: &str,
        query: HistoryQuery,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        let events = self
            .attached()?
            .history(self.guild, target, query, limit)
            .await?;
        Ok(events.into_iter().map(Self::to_history).collect())
    }
}

#[async_trait]
impl Backend for SessionBackend {
    async fn network_name(&mut self) -> Result<String, BackendError> {
        match self.guild {
            Some(guild) => self.attached()?.guild_name(guild).await,
            None => Ok(self.config.server.network.clone()),
        }
    }

    async fn server_name(&mut self) -> Result<String, BackendError> {
        Ok(self.config.server.name.clone())
    }

    async fn server_version(&mut self) -> Result<String, BackendError> {
        Ok(concat!("snowgate-", env!("CARGO_PKG_VERSION")).to_owned())
    }

    async fn server_created(&mut self) -> Result<DateTime<Utc>, BackendError> {
        Ok(self.attached()?.guild_date(self.guild))
    }

    async fn motd(&mut self) -> Result<Vec<String>, BackendError> {
        Ok(self.config.server.motd.clone())
    }

    async fn handle_nickname(&mut self, nickname: &str) -> Result<String, BackendError> {
        // the real nick comes from the backend at registration
        Ok(nickname.to_owned())
    }

    async fn handle_username(&mut self, username: &str) -> Result<String, BackendError> {
        Ok(username.to_owned())
    }

    async fn handle_realname(&mut self, realname: &str) -> Result<String, BackendError> {
        Ok(realname.to_owned())
    }

    async fn handle_password(&mut self, password: &str) -> Result<String, BackendError> {
        Ok(password.to_owned())
    }

    async fn handle_ping(&mut self, nonce: &str) -> Result<String, BackendError> {
        Ok(nonce.to_owned())
    }

    async fn handle_register(&mut self, login: &Login) -> Result<Option<Prefix>, BackendError> {
        let (token, guild) = parse_login(login.token())?;
        let session = self.registry.get_or_create(token).await?;
        match Self::registered_prefix(&session, guild).await {
            Ok(prefix) => {
                self.session = Some(session);
                self.guild = guild;
                Ok(Some(prefix))
            }
            Err(e) => {
                session.release().await;
                Err(e)
            }
        }
    }

    async fn handle_join(&mut self, channel: &str) -> Result<(), BackendError> {
        self.attached()?.resolve_channel(self.guild, channel).await
    }

    async fn handle_topic(&mut self, channel: &str) -> Result<String, BackendError> {
        self.attached()?.channel_topic(self.guild, channel).await
    }

    async fn handle_creation_time(
        &mut self,
        channel: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        self.attached()?.channel_created(self.guild, channel).await
    }

    async fn handle_names(&mut self, channel: &str) -> Result<Vec<String>, BackendError> {
        self.attached()?.channel_names(self.guild, channel).await
    }

    async fn handle_message(
        &mut self,
        channel: &str,
        content: &str,
    ) -> Result<(), BackendError> {
        self.attached()?
            .send_message(self.guild, channel, content)
            .await
    }

    async fn handle_list(&mut self) -> Result<Vec<ListEntry>, BackendError> {
        let listings = self.attached()?.list_channels(self.guild).await?;
        // the user-count column carries the channel's list position, which
        // is the ordering clients actually care about here
        Ok(listings
            .into_iter()
            .map(|l| ListEntry {
                channel: l.name,
                users: l.position as usize,
                topic: l.topic,
            })
            .collect())
    }

    async fn handle_whois(&mut self, user: &str) -> Result<WhoisReply, BackendError> {
        let info = self.attached()?.whois(self.guild, user).await?;
        Ok(WhoisReply {
            prefix: user_prefix(&info),
            realname: info.username,
            server: self.config.server.name.clone(),
            server_info: self.config.server.network.clone(),
            is_operator: false,
            last_active: None,
            channels: Vec::new(),
        })
    }

    async fn handle_history_before(
        &mut self,
        target: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.history(target, HistoryQuery::Before(before), limit).await
    }

    async fn handle_history_after(
        &mut self,
        target: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.history(target, HistoryQuery::After(after), limit).await
    }

    async fn handle_history_latest(
        &mut self,
        target: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.history(target, HistoryQuery::Latest, limit).await
    }

    async fn handle_history_around(
        &mut self,
        target: &str,
        around: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.history(target, HistoryQuery::Around(around), limit).await
    }

    async fn handle_history_between(
        &mut self,
        target: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.history(target, HistoryQuery::Between(from, to), limit)
            .await
    }

    async fn handle_typing_active(&mut self, channel: &str) -> Result<(), BackendError> {
        self.attached()?.typing(self.guild, channel).await
    }

    async fn handle_typing_paused(&mut self, _channel: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn handle_typing_done(&mut self, _channel: &str) -> Result<(), BackendError> {
        Ok(())
    }
}
