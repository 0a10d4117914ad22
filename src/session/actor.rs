//! The session actor task.
//!
//! One task per session owns the backend client and all name-resolution
//! state. It consumes exactly one input at a time, either a queued
//! request from a client connection or a pushed backend event, so the
//! name maps never see concurrent mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::backend::{
    BackendError, ChannelInfo, ChatMessage, Client, Event, Member, Snowflake, TypingStart, User,
};
use crate::idmap::{sanitize, IdMap};
use crate::render::Render;

use super::events::{EventUser, MessageEvent, NickChangeEvent, SessionEvent, TypingEvent};
use super::{ChannelListing, HistoryQuery, Session};

type Reply<T> = oneshot::Sender<Result<T, BackendError>>;

pub(super) enum Request {
    ValidateGuild {
        guild: Snowflake,
        reply: Reply<()>,
    },
    GuildName {
        guild: Snowflake,
        reply: Reply<String>,
    },
    SendMessage {
        guild: Option<Snowflake>,
        channel: String,
        content: String,
        reply: Reply<()>,
    },
    ResolveChannel {
        guild: Option<Snowflake>,
        channel: String,
        reply: Reply<()>,
    },
    ChannelTopic {
        guild: Option<Snowflake>,
        channel: String,
        reply: Reply<String>,
    },
    ChannelCreated {
        guild: Option<Snowflake>,
        channel: String,
        reply: Reply<Option<DateTime<Utc>>>,
    },
    ChannelNames {
        guild: Option<Snowflake>,
        channel: String,
        reply: Reply<Vec<String>>,
    },
    ListChannels {
        guild: Option<Snowflake>,
        reply: Reply<Vec<ChannelListing>>,
    },
    Whois {
        guild: Option<Snowflake>,
        nickname: String,
        reply: Reply<EventUser>,
    },
    History {
        guild: Option<Snowflake>,
        channel: String,
        query: HistoryQuery,
        limit: usize,
        reply: Reply<Vec<MessageEvent>>,
    },
    Typing {
        guild: Option<Snowflake>,
        channel: String,
        reply: Reply<()>,
    },
    TypingSubscribe {
        guild: Snowflake,
        reply: Reply<()>,
    },
    NickName {
        guild: Option<Snowflake>,
        reply: Reply<String>,
    },
    UserName {
        reply: Reply<String>,
    },
    Shutdown,
}

struct State {
    session: Arc<Session>,
    renderer: Arc<dyn Render>,
    users: HashMap<Snowflake, String>,
    nick_maps: HashMap<Option<Snowflake>, IdMap>,
    channel_maps: HashMap<Option<Snowflake>, IdMap>,
    channels_loaded: HashSet<Snowflake>,
}

pub(super) async fn run(
    session: Arc<Session>,
    mut client: Box<dyn Client>,
    renderer: Arc<dyn Render>,
    mut reqs: mpsc::Receiver<Request>,
) {
    let user = session.user_id();
    debug!(%user, "session actor started");
    let mut state = State {
        session,
        renderer,
        users: HashMap::new(),
        nick_maps: HashMap::new(),
        channel_maps: HashMap::new(),
        channels_loaded: HashSet::new(),
    };

    loop {
        tokio::select! {
            req = reqs.recv() => match req {
                None | Some(Request::Shutdown) => break,
                Some(req) => state.handle_request(client.as_mut(), req).await,
            },
            event = client.next_event() => match event {
                Ok(event) => state.handle_event(client.as_ref(), event).await,
                Err(e) => {
                    warn!(%user, error = %e, "backend event stream ended");
                    break;
                }
            },
        }
    }

    client.close().await;
    debug!(%user, "session actor stopped");
}

/// An IRC-safe nickname for a user, falling back to the id when nothing
/// printable survives.
fn ideal_nick(id: Snowflake, name: &str) -> String {
    let cleaned = sanitize_nick(name);
    if cleaned.is_empty() {
        id.to_string()
    } else {
        cleaned
    }
}

/// Strip characters invalid in an IRC nickname.
fn sanitize_nick(name: &str) -> String {
    name.chars()
        .filter(|&c| {
            c.is_alphanumeric()
                || matches!(c, '_' | '-' | '{' | '}' | '[' | ']' | '\\' | '`' | '|')
        })
        .collect()
}

impl State {
    fn nick_map(&mut self, guild: Option<Snowflake>) -> &mut IdMap {
        self.nick_maps.entry(guild).or_default()
    }

    fn channel_map(&mut self, guild: Option<Snowflake>) -> &mut IdMap {
        self.channel_maps.entry(guild).or_default()
    }

    async fn harvest_user(&mut self, user: &User) {
        if !user.id.is_valid() || user.username.is_empty() {
            return;
        }
        self.users.insert(user.id, user.username.clone());
        self.harvest_nick(None, user, None).await;
    }

    /// Record a user's nickname within a guild scope, announcing the
    /// rename to listeners when an established name changes.
    async fn harvest_nick(&mut self, guild: Option<Snowflake>, user: &User, nick: Option<&str>) {
        if !user.id.is_valid() {
            return;
        }
        let name = nick.filter(|n| !n.is_empty()).unwrap_or(&user.username);
        if name.is_empty() {
            return;
        }
        let ideal = ideal_nick(user.id, name);
        let (pre, post) = self.nick_map(guild).insert(user.id, &ideal);
        if let Some(pre) = pre {
            if pre != post {
                let event = NickChangeEvent {
                    guild,
                    id: user.id,
                    old: pre,
                    new: post,
                };
                self.session
                    .broadcast(SessionEvent::NickChange(event), guild)
                    .await;
            }
        }
    }

    async fn harvest_member(&mut self, guild: Option<Snowflake>, member: &Member) {
        self.harvest_user(&member.user).await;
        self.harvest_nick(guild, &member.user, member.nick.as_deref()).await;
    }

    fn harvest_channel(&mut self, guild: Option<Snowflake>, channel: &ChannelInfo) {
        // TODO: announce channel renames once a client-visible form exists
        let name = sanitize(&channel.name);
        let ideal = if name.is_empty() {
            channel.id.to_string()
        } else {
            name
        };
        self.channel_map(guild).insert(channel.id, &ideal);
    }

    async fn user_name(
        &mut self,
        client: &dyn Client,
        id: Snowflake,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.users.get(&id) {
            return Ok(name.clone());
        }
        let user = client.user(id).await?;
        self.harvest_user(&user).await;
        Ok(user.username)
    }

    async fn nick_name(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        id: Snowflake,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.nick_maps.get(&guild).and_then(|m| m.name(id)) {
            return Ok(name.to_owned());
        }
        match guild {
            Some(g) => match client.member(g, id).await {
                Ok(member) => self.harvest_member(guild, &member).await,
                Err(e) if e.is_not_found() => {
                    // not (or no longer) a member; fall back to the username
                    let username = self.user_name(client, id).await?;
                    let ideal = ideal_nick(id, &username);
                    self.nick_map(guild).insert(id, &ideal);
                }
                Err(e) => return Err(e),
            },
            None => {
                self.user_name(client, id).await?;
            }
        }
        Ok(self
            .nick_maps
            .get(&guild)
            .and_then(|m| m.name(id))
            .map(str::to_owned)
            .unwrap_or_else(|| id.to_string()))
    }

    async fn event_user(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        id: Snowflake,
    ) -> Result<EventUser, BackendError> {
        Ok(EventUser {
            nickname: self.nick_name(client, guild, id).await?,
            username: self.user_name(client, id).await?,
            id,
        })
    }

    async fn ensure_channels(
        &mut self,
        client: &dyn Client,
        guild: Snowflake,
    ) -> Result<(), BackendError> {
        if self.channels_loaded.contains(&guild) {
            return Ok(());
        }
        let channels = client.channels(guild).await?;
        for channel in &channels {
            self.harvest_channel(Some(guild), channel);
        }
        self.channels_loaded.insert(guild);
        Ok(())
    }

    async fn channel_id(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        name: &str,
    ) -> Result<Snowflake, BackendError> {
        let bare = name.trim_start_matches('#');
        if bare.is_empty() {
            return Err(BackendError::NoSuchChannel(name.to_owned()));
        }
        if let Some(id) = self.channel_maps.get(&guild).and_then(|m| m.snowflake(bare)) {
            return Ok(id);
        }
        if let Some(g) = guild {
            self.ensure_channels(client, g).await?;
            if let Some(id) = self.channel_maps.get(&guild).and_then(|m| m.snowflake(bare)) {
                return Ok(id);
            }
        }
        Err(BackendError::NoSuchChannel(name.to_owned()))
    }

    async fn channel_name(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        id: Snowflake,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.channel_maps.get(&guild).and_then(|m| m.name(id)) {
            return Ok(format!("#{}", name));
        }
        let channel = client.channel(id).await?;
        self.harvest_channel(guild, &channel);
        match self.channel_maps.get(&guild).and_then(|m| m.name(id)) {
            Some(name) => Ok(format!("#{}", name)),
            None => Ok(format!("#{}", id)),
        }
    }

    async fn channel_info(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        name: &str,
    ) -> Result<ChannelInfo, BackendError> {
        let id = self.channel_id(client, guild, name).await?;
        client.channel(id).await
    }

    fn flat_topic(&self, topic: Option<&str>) -> String {
        match topic {
            Some(topic) => self.renderer.content(topic).replace('\n', " "),
            None => String::new(),
        }
    }

    async fn message_to_event(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        msg: &ChatMessage,
    ) -> Result<MessageEvent, BackendError> {
        self.harvest_user(&msg.author).await;
        if let Some(member) = &msg.member {
            self.harvest_member(guild, member).await;
        }
        let channel = self.channel_name(client, guild, msg.channel_id).await?;
        let author = self.event_user(client, guild, msg.author.id).await?;
        Ok(MessageEvent {
            channel,
            content: self.renderer.message(msg),
            id: msg.id.to_string(),
            author,
            date: msg.id.timestamp(),
        })
    }

    async fn typing_to_event(
        &mut self,
        client: &dyn Client,
        typing: &TypingStart,
    ) -> Result<TypingEvent, BackendError> {
        let channel = self
            .channel_name(client, typing.guild_id, typing.channel_id)
            .await?;
        let user = self
            .event_user(client, typing.guild_id, typing.user_id)
            .await?;
        Ok(TypingEvent {
            channel,
            user,
            date: DateTime::from_timestamp(typing.timestamp, 0).unwrap_or_default(),
        })
    }

    async fn handle_event(&mut self, client: &dyn Client, event: Event) {
        match event {
            Event::Ready { guilds, .. } => {
                for snapshot in &guilds {
                    for channel in &snapshot.channels {
                        self.harvest_channel(Some(snapshot.guild.id), channel);
                    }
                    for member in &snapshot.members {
                        self.harvest_member(Some(snapshot.guild.id), member).await;
                    }
                    self.channels_loaded.insert(snapshot.guild.id);
                }
            }
            Event::MessageCreate(msg) => {
                let guild = msg.guild_id;
                match self.message_to_event(client, guild, &msg).await {
                    Ok(event) => {
                        self.session
                            .broadcast(SessionEvent::Message(event), guild)
                            .await
                    }
                    Err(e) => warn!(error = %e, "dropping untranslatable message"),
                }
            }
            Event::TypingStart(typing) => {
                if let Some(member) = &typing.member {
                    self.harvest_member(typing.guild_id, member).await;
                }
                match self.typing_to_event(client, &typing).await {
                    Ok(event) => {
                        self.session
                            .broadcast(SessionEvent::Typing(event), typing.guild_id)
                            .await
                    }
                    Err(e) => warn!(error = %e, "dropping untranslatable typing event"),
                }
            }
            Event::MemberUpdate {
                guild_id,
                user,
                nick,
            } => {
                self.harvest_user(&user).await;
                self.harvest_nick(Some(guild_id), &user, nick.as_deref()).await;
            }
            Event::ChannelUpdate(channel) => {
                let guild = channel.guild_id;
                self.harvest_channel(guild, &channel);
            }
        }
    }

    async fn handle_request(&mut self, client: &mut dyn Client, req: Request) {
        match req {
            Request::ValidateGuild { guild, reply } => {
                let _ = reply.send(client.guild(guild).await.map(|_| ()));
            }
            Request::GuildName { guild, reply } => {
                let _ = reply.send(client.guild(guild).await.map(|g| g.name));
            }
            Request::SendMessage {
                guild,
                channel,
                content,
                reply,
            } => {
                let result = match self.channel_id(&*client, guild, &channel).await {
                    Ok(id) => client.send_message(id, &content).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::ResolveChannel {
                guild,
                channel,
                reply,
            } => {
                let _ = reply.send(
                    self.channel_id(&*client, guild, &channel)
                        .await
                        .map(|_| ()),
                );
            }
            Request::ChannelTopic {
                guild,
                channel,
                reply,
            } => {
                let result = self
                    .channel_info(&*client, guild, &channel)
                    .await
                    .map(|info| self.flat_topic(info.topic.as_deref()));
                let _ = reply.send(result);
            }
            Request::ChannelCreated {
                guild,
                channel,
                reply,
            } => {
                // creation time is carried by the channel's own snowflake
                let result = self
                    .channel_id(&*client, guild, &channel)
                    .await
                    .map(|id| Some(id.timestamp()));
                let _ = reply.send(result);
            }
            Request::ChannelNames {
                guild,
                channel,
                reply,
            } => {
                let _ = reply.send(self.op_names(&*client, guild, &channel).await);
            }
            Request::ListChannels { guild, reply } => {
                let _ = reply.send(self.op_list(&*client, guild).await);
            }
            Request::Whois {
                guild,
                nickname,
                reply,
            } => {
                let _ = reply.send(self.op_whois(&*client, guild, &nickname).await);
            }
            Request::History {
                guild,
                channel,
                query,
                limit,
                reply,
            } => {
                let _ = reply.send(self.op_history(&*client, guild, &channel, query, limit).await);
            }
            Request::Typing {
                guild,
                channel,
                reply,
            } => {
                let result = match self.channel_id(&*client, guild, &channel).await {
                    Ok(id) => client.set_typing(id).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::TypingSubscribe { guild, reply } => {
                let _ = reply.send(client.subscribe_typing(guild).await);
            }
            Request::NickName { guild, reply } => {
                let id = self.session.user_id();
                let _ = reply.send(self.nick_name(&*client, guild, id).await);
            }
            Request::UserName { reply } => {
                let id = self.session.user_id();
                let _ = reply.send(self.user_name(&*client, id).await);
            }
            Request::Shutdown => unreachable!("handled by the actor loop"),
        }
    }

    async fn op_names(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<Vec<String>, BackendError> {
        let id = self.channel_id(client, guild, channel).await?;
        let members = client.channel_members(id).await?;
        let mut names = Vec::with_capacity(members.len());
        for member in &members {
            self.harvest_member(guild, member).await;
            names.push(self.nick_name(client, guild, member.user.id).await?);
        }
        Ok(names)
    }

    async fn op_list(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
    ) -> Result<Vec<ChannelListing>, BackendError> {
        let Some(g) = guild else {
            return Err(BackendError::Request(
                "LIST outside a guild is not supported".to_owned(),
            ));
        };
        self.ensure_channels(client, g).await?;
        let mut channels = client.channels(g).await?;
        channels.sort_by_key(|c| c.position);

        let mut listings = Vec::with_capacity(channels.len());
        for channel in &channels {
            listings.push(ChannelListing {
                name: self.channel_name(client, guild, channel.id).await?,
                position: channel.position,
                topic: self.flat_topic(channel.topic.as_deref()),
            });
        }
        Ok(listings)
    }

    async fn op_whois(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        nickname: &str,
    ) -> Result<EventUser, BackendError> {
        let id = self
            .nick_maps
            .get(&guild)
            .and_then(|m| m.snowflake(nickname))
            .ok_or_else(|| BackendError::NoSuchUser(nickname.to_owned()))?;
        let username = self.user_name(client, id).await?;
        Ok(EventUser {
            nickname: nickname.to_owned(),
            username,
            id,
        })
    }

    async fn op_history(
        &mut self,
        client: &dyn Client,
        guild: Option<Snowflake>,
        channel: &str,
        query: HistoryQuery,
        limit: usize,
    ) -> Result<Vec<MessageEvent>, BackendError> {
        let id = self.channel_id(client, guild, channel).await?;
        let messages = match query {
            HistoryQuery::Before(t) => {
                client
                    .messages_before(id, Snowflake::from_timestamp(t), limit)
                    .await?
            }
            HistoryQuery::After(t) => {
                client
                    .messages_after(id, Snowflake::from_timestamp(t), limit)
                    .await?
            }
            HistoryQuery::Around(t) => {
                client
                    .messages_around(id, Snowflake::from_timestamp(t), limit)
                    .await?
            }
            HistoryQuery::Latest => {
                client
                    .messages_before(id, Snowflake::from_timestamp(Utc::now()), limit)
                    .await?
            }
            HistoryQuery::Between(from, to) => {
                let mut messages = client
                    .messages_after(id, Snowflake::from_timestamp(from), limit)
                    .await?;
                let cutoff = Snowflake::from_timestamp(to);
                messages.retain(|m| m.id <= cutoff);
                messages
            }
        };

        let mut events = Vec::with_capacity(messages.len());
        for message in &messages {
            events.push(self.message_to_event(client, guild, message).await?);
        }
        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}
