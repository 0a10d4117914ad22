//! The wire backend: JSON over WebSocket for events, HTTP for lookups.
//!
//! The event stream speaks a small envelope protocol: every frame is a JSON
//! object with an event name `t` and a payload `d`. The connection is
//! identified by sending an `identify` operation and waiting for the
//! `ready` event, which carries the account and the initial guild state.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::types::{
    Account, ChannelInfo, ChatMessage, Event, GuildInfo, GuildSnapshot, Member, Snowflake,
    TypingStart, User,
};
use super::{BackendError, Client, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct Identify<'a> {
    op: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct GuildSubscribe {
    op: &'static str,
    guild_id: Snowflake,
    typing: bool,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    t: String,
    #[serde(borrow)]
    d: &'a RawValue,
}

#[derive(Deserialize)]
struct ReadyPayload {
    account: Account,
    #[serde(default)]
    guilds: Vec<GuildSnapshot>,
}

#[derive(Deserialize)]
struct MemberUpdatePayload {
    guild_id: Snowflake,
    user: User,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

fn decode_event(frame: &str) -> Result<Option<Event>, BackendError> {
    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| BackendError::Request(e.to_string()))?;
    let payload = envelope.d.get();
    let decode_err = |e: serde_json::Error| BackendError::Request(e.to_string());

    let event = match envelope.t.as_str() {
        "ready" => {
            let ready: ReadyPayload = serde_json::from_str(payload).map_err(decode_err)?;
            Event::Ready {
                account: ready.account,
                guilds: ready.guilds,
            }
        }
        "message_create" => {
            Event::MessageCreate(serde_json::from_str(payload).map_err(decode_err)?)
        }
        "typing_start" => Event::TypingStart(serde_json::from_str(payload).map_err(decode_err)?),
        "member_update" => {
            let upd: MemberUpdatePayload = serde_json::from_str(payload).map_err(decode_err)?;
            Event::MemberUpdate {
                guild_id: upd.guild_id,
                user: upd.user,
                nick: upd.nick,
            }
        }
        "channel_update" | "channel_create" => {
            Event::ChannelUpdate(serde_json::from_str(payload).map_err(decode_err)?)
        }
        other => {
            debug!(event = other, "ignoring unknown event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Dials the wire backend.
pub struct WireConnector {
    http: reqwest::Client,
    api_url: String,
    gateway_url: String,
}

impl WireConnector {
    pub fn new(api_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        WireConnector {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            gateway_url: gateway_url.into(),
        }
    }
}

#[async_trait]
impl Connector for WireConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn Client>, BackendError> {
        let (mut ws, _) = connect_async(&self.gateway_url)
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let identify = serde_json::to_string(&Identify {
            op: "identify",
            token,
        })
        .map_err(|e| BackendError::Request(e.to_string()))?;
        ws.send(WsMessage::Text(identify.into()))
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        // The first event must be `ready`; anything else means the token
        // was rejected before identification completed.
        loop {
            let frame = match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(BackendError::Auth("connection closed during identify".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BackendError::Request(e.to_string())),
            };
            match decode_event(&frame)? {
                Some(Event::Ready { account, guilds }) => {
                    debug!(user = %account.id, "backend connection ready");
                    let mut pending = VecDeque::new();
                    pending.push_back(Event::Ready {
                        account: account.clone(),
                        guilds,
                    });
                    return Ok(Box::new(WireClient {
                        http: self.http.clone(),
                        api_url: self.api_url.clone(),
                        token: token.to_owned(),
                        account,
                        ws: Some(ws),
                        pending,
                    }));
                }
                Some(_) | None => continue,
            }
        }
    }
}

/// One live wire connection.
pub struct WireClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    account: Account,
    ws: Option<WsStream>,
    pending: VecDeque<Event>,
}

impl WireClient {
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let resp = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Self::check_status(resp.status(), path)?;
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn post<B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<(), BackendError> {
        let mut req = self
            .http
            .post(format!("{}{}", self.api_url, path))
            .header("Authorization", &self.token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Self::check_status(resp.status(), path)
    }

    fn check_status(status: StatusCode, path: &str) -> Result<(), BackendError> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(BackendError::NoSuchChannel(path.to_owned())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::Auth(format!("{} on {}", status, path)))
            }
            s => Err(BackendError::Request(format!("{} on {}", s, path))),
        }
    }

    fn ws_mut(&mut self) -> Result<&mut WsStream, BackendError> {
        self.ws.as_mut().ok_or(BackendError::Closed)
    }
}

#[async_trait]
impl Client for WireClient {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn next_event(&mut self) -> Result<Event, BackendError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        let ws = self.ws_mut()?;
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => match decode_event(&text) {
                    Ok(Some(event)) => return Ok(event),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable event frame");
                        continue;
                    }
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    ws.send(WsMessage::Pong(data))
                        .await
                        .map_err(|e| BackendError::Request(e.to_string()))?;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.ws = None;
                    return Err(BackendError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(BackendError::Request(e.to_string()));
                }
            }
        }
    }

    async fn user(&self, id: Snowflake) -> Result<User, BackendError> {
        self.get(&format!("/users/{}", id))
            .await
            .map_err(|e| match e {
                BackendError::NoSuchChannel(_) => BackendError::NoSuchUser(id.to_string()),
                e => e,
            })
    }

    async fn member(&self, guild: Snowflake, user: Snowflake) -> Result<Member, BackendError> {
        self.get(&format!("/guilds/{}/members/{}", guild, user))
            .await
            .map_err(|e| match e {
                BackendError::NoSuchChannel(_) => BackendError::NoSuchUser(user.to_string()),
                e => e,
            })
    }

    async fn guild(&self, id: Snowflake) -> Result<GuildInfo, BackendError> {
        self.get(&format!("/guilds/{}", id))
            .await
            .map_err(|e| match e {
                BackendError::NoSuchChannel(_) => BackendError::NoSuchGuild(id),
                e => e,
            })
    }

    async fn channel(&self, id: Snowflake) -> Result<ChannelInfo, BackendError> {
        self.get(&format!("/channels/{}", id)).await
    }

    async fn channels(&self, guild: Snowflake) -> Result<Vec<ChannelInfo>, BackendError> {
        self.get(&format!("/guilds/{}/channels", guild)).await
    }

    async fn channel_members(&self, channel: Snowflake) -> Result<Vec<Member>, BackendError> {
        self.get(&format!("/channels/{}/members", channel)).await
    }

    async fn send_message(&self, channel: Snowflake, content: &str) -> Result<(), BackendError> {
        self.post(
            &format!("/channels/{}/messages", channel),
            Some(&CreateMessage { content }),
        )
        .await
    }

    async fn messages_before(
        &self,
        channel: Snowflake,
        before: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        self.get(&format!(
            "/channels/{}/messages?before={}&limit={}",
            channel, before, limit
        ))
        .await
    }

    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        self.get(&format!(
            "/channels/{}/messages?after={}&limit={}",
            channel, after, limit
        ))
        .await
    }

    async fn messages_around(
        &self,
        channel: Snowflake,
        around: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        self.get(&format!(
            "/channels/{}/messages?around={}&limit={}",
            channel, around, limit
        ))
        .await
    }

    async fn set_typing(&self, channel: Snowflake) -> Result<(), BackendError> {
        self.post::<()>(&format!("/channels/{}/typing", channel), None)
            .await
    }

    async fn subscribe_typing(&mut self, guild: Snowflake) -> Result<(), BackendError> {
        let subscribe = serde_json::to_string(&GuildSubscribe {
            op: "guild_subscribe",
            guild_id: guild,
            typing: true,
        })
        .map_err(|e| BackendError::Request(e.to_string()))?;
        self.ws_mut()?
            .send(WsMessage::Text(subscribe.into()))
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }
}
