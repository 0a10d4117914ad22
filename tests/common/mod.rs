//! Shared fixtures for integration tests: an in-memory backend world and
//! a line-oriented test client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use snowgate::backend::{
    Account, BackendError, ChannelInfo, ChatMessage, Client, Connector, Event, GuildInfo, Member,
    Snowflake, User,
};
use snowgate::config::{BackendConfig, Config, ListenConfig, ServerConfig};
use snowgate::network::Gateway;
use snowgate::registry::SessionRegistry;
use snowgate::render::MarkupRenderer;
use snowgate_proto::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn sf(n: u64) -> Snowflake {
    Snowflake(n << 22)
}

fn user(id: Snowflake, username: &str) -> User {
    User {
        id,
        username: username.to_owned(),
    }
}

fn member(u: User) -> Member {
    Member {
        user: u,
        nick: None,
    }
}

struct WorldInner {
    accounts: HashMap<String, Snowflake>,
    users: HashMap<Snowflake, User>,
    guilds: HashMap<Snowflake, GuildInfo>,
    members: HashMap<(Snowflake, Snowflake), Member>,
    channels: HashMap<Snowflake, ChannelInfo>,
    channel_members: HashMap<Snowflake, Vec<Member>>,
    messages: HashMap<Snowflake, Vec<ChatMessage>>,
    sent: Vec<(Snowflake, String)>,
    event_taps: Vec<mpsc::UnboundedSender<Event>>,
}

/// The backend the gateway under test talks to.
pub struct World {
    inner: Mutex<WorldInner>,
    dials: AtomicUsize,
}

pub const GUILD: Snowflake = Snowflake(10 << 22);
pub const GENERAL: Snowflake = Snowflake(100 << 22);

impl World {
    /// One account (token "tok", user ada) in one guild with #general
    /// and #random, a second member bob, and two messages in #general.
    pub fn new() -> Arc<World> {
        let me = sf(1);
        let ada = user(me, "ada");
        let bob = user(sf(2), "bob");
        let random = sf(101);

        let mut channels = HashMap::new();
        channels.insert(
            GENERAL,
            ChannelInfo {
                id: GENERAL,
                guild_id: Some(GUILD),
                name: "general".to_owned(),
                topic: Some("house rules".to_owned()),
                position: 1,
            },
        );
        channels.insert(
            random,
            ChannelInfo {
                id: random,
                guild_id: Some(GUILD),
                name: "random".to_owned(),
                topic: None,
                position: 0,
            },
        );

        let mut messages = HashMap::new();
        messages.insert(
            GENERAL,
            vec![
                ChatMessage {
                    id: sf(500),
                    channel_id: GENERAL,
                    guild_id: Some(GUILD),
                    author: bob.clone(),
                    member: None,
                    content: "older".to_owned(),
                },
                ChatMessage {
                    id: sf(600),
                    channel_id: GENERAL,
                    guild_id: Some(GUILD),
                    author: bob.clone(),
                    member: None,
                    content: "newer".to_owned(),
                },
            ],
        );

        let mut members = HashMap::new();
        members.insert((GUILD, me), member(ada.clone()));
        members.insert((GUILD, bob.id), member(bob.clone()));

        let mut channel_members = HashMap::new();
        channel_members.insert(GENERAL, vec![member(ada.clone()), member(bob.clone())]);

        Arc::new(World {
            inner: Mutex::new(WorldInner {
                accounts: HashMap::from([("tok".to_owned(), me)]),
                users: HashMap::from([(me, ada), (bob.id, bob)]),
                guilds: HashMap::from([(
                    GUILD,
                    GuildInfo {
                        id: GUILD,
                        name: "testers".to_owned(),
                    },
                )]),
                members,
                channels,
                channel_members,
                messages,
                sent: Vec::new(),
                event_taps: Vec::new(),
            }),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Snowflake, String)> {
        self.inner.lock().sent.clone()
    }

    /// Push an event to every live backend connection.
    pub fn push_event(&self, event: Event) {
        self.inner
            .lock()
            .event_taps
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub struct WorldConnector(pub Arc<World>);

#[async_trait]
impl Connector for WorldConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn Client>, BackendError> {
        self.0.dials.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.0.inner.lock();
        let id = *inner
            .accounts
            .get(token)
            .ok_or_else(|| BackendError::Auth("unknown token".to_owned()))?;
        let username = inner.users[&id].username.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.event_taps.push(tx);
        Ok(Box::new(WorldClient {
            world: Arc::clone(&self.0),
            account: Account { id, username },
            events: rx,
        }))
    }
}

struct WorldClient {
    world: Arc<World>,
    account: Account,
    events: mpsc::UnboundedReceiver<Event>,
}

#[async_trait]
impl Client for WorldClient {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn next_event(&mut self) -> Result<Event, BackendError> {
        self.events.recv().await.ok_or(BackendError::Closed)
    }

    async fn user(&self, id: Snowflake) -> Result<User, BackendError> {
        self.world
            .inner
            .lock()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::NoSuchUser(id.to_string()))
    }

    async fn member(&self, guild: Snowflake, user: Snowflake) -> Result<Member, BackendError> {
        self.world
            .inner
            .lock()
            .members
            .get(&(guild, user))
            .cloned()
            .ok_or_else(|| BackendError::NoSuchUser(user.to_string()))
    }

    async fn guild(&self, id: Snowflake) -> Result<GuildInfo, BackendError> {
        self.world
            .inner
            .lock()
            .guilds
            .get(&id)
            .cloned()
            .ok_or(BackendError::NoSuchGuild(id))
    }

    async fn channel(&self, id: Snowflake) -> Result<ChannelInfo, BackendError> {
        self.world
            .inner
            .lock()
            .channels
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::NoSuchChannel(id.to_string()))
    }

    async fn channels(&self, guild: Snowflake) -> Result<Vec<ChannelInfo>, BackendError> {
        Ok(self
            .world
            .inner
            .lock()
            .channels
            .values()
            .filter(|c| c.guild_id == Some(guild))
            .cloned()
            .collect())
    }

    async fn channel_members(&self, channel: Snowflake) -> Result<Vec<Member>, BackendError> {
        self.world
            .inner
            .lock()
            .channel_members
            .get(&channel)
            .cloned()
            .ok_or_else(|| BackendError::NoSuchChannel(channel.to_string()))
    }

    async fn send_message(&self, channel: Snowflake, content: &str) -> Result<(), BackendError> {
        self.world
            .inner
            .lock()
            .sent
            .push((channel, content.to_owned()));
        Ok(())
    }

    async fn messages_before(
        &self,
        channel: Snowflake,
        before: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        let mut msgs: Vec<ChatMessage> = self
            .world
            .inner
            .lock()
            .messages
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|m| m.id < before)
            .cloned()
            .collect();
        msgs.sort_by_key(|m| std::cmp::Reverse(m.id));
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn messages_after(
        &self,
        channel: Snowflake,
        after: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        let mut msgs: Vec<ChatMessage> = self
            .world
            .inner
            .lock()
            .messages
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|m| m.id > after)
            .cloned()
            .collect();
        msgs.sort_by_key(|m| m.id);
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn messages_around(
        &self,
        channel: Snowflake,
        _around: Snowflake,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        let mut msgs = self
            .world
            .inner
            .lock()
            .messages
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn set_typing(&self, _channel: Snowflake) -> Result<(), BackendError> {
        Ok(())
    }

    async fn subscribe_typing(&mut self, _guild: Snowflake) -> Result<(), BackendError> {
        Ok(())
    }

    async fn close(&mut self) {
        self.events.close();
    }
}

/// A gateway bound to an ephemeral port, backed by a [`World`].
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub world: Arc<World>,
}

impl TestServer {
    pub async fn spawn() -> TestServer {
        Self::spawn_with(World::new()).await
    }

    pub async fn spawn_with(world: Arc<World>) -> TestServer {
        let config = Config {
            server: ServerConfig {
                name: "gate.test".to_owned(),
                network: "testnet".to_owned(),
                motd: vec!["welcome to the test gateway".to_owned()],
            },
            listen: ListenConfig {
                address: "127.0.0.1:0".parse().expect("listen address"),
            },
            tls: None,
            backend: BackendConfig {
                api_url: "http://unused.invalid".to_owned(),
                gateway_url: "ws://unused.invalid".to_owned(),
            },
        };
        let registry = SessionRegistry::new(
            Arc::new(WorldConnector(Arc::clone(&world))),
            Arc::new(MarkupRenderer),
        );
        let gateway = Gateway::bind(config, Arc::clone(&registry))
            .await
            .expect("failed to bind test gateway");
        let addr = gateway.local_addr().expect("local addr");
        tokio::spawn(gateway.run());
        TestServer {
            addr,
            registry,
            world,
        }
    }
}

/// A raw IRC line client.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("failed to connect");
        let (read, write) = stream.into_split();
        TestClient {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.write
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .expect("failed to write line");
    }

    pub async fn recv(&mut self) -> Message {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read error")
            .expect("connection closed");
        line.parse().expect("unparsable server line")
    }

    /// Read until a message with `command` arrives, returning it.
    pub async fn recv_command(&mut self, command: &str) -> Message {
        loop {
            let msg = self.recv().await;
            if msg.command == command {
                return msg;
            }
        }
    }

    /// Register with PASS, collecting the welcome burst through 376.
    pub async fn register(&mut self, pass: &str) -> Vec<Message> {
        self.send(&format!("PASS {}", pass)).await;
        self.send("NICK ada").await;
        self.send("USER ada 0 * :Ada L").await;
        let mut burst = vec![self.recv_command("001").await];
        loop {
            let msg = self.recv().await;
            let done = msg.command == "376";
            burst.push(msg);
            if done {
                return burst;
            }
        }
    }
}
