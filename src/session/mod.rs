//! Shared backend sessions.
//!
//! All client connections authenticated as the same backend account share
//! one [`Session`]. The session owns the backend connection and every
//! piece of mutable account state (name maps, user cache) inside a single
//! actor task; concurrent callers reach it only through serialized
//! requests, so no state is ever touched by two inputs at once. Events
//! from the backend are fanned out to registered listeners, scoped by
//! guild.

mod actor;
pub mod events;

pub use events::{EventUser, MessageEvent, NickChangeEvent, SessionEvent, TypingEvent};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::backend::{Account, BackendError, Client, Snowflake};
use crate::render::Render;
use actor::Request;

/// How long a stalled listener may hold up event fan-out before it is
/// dropped.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(1);

const EVENT_QUEUE_DEPTH: usize = 64;
const REQUEST_QUEUE_DEPTH: usize = 32;

/// Decides, under the registrar's lock, whether a released reference was
/// the last one and unregisters the session if so.
pub type RemoveFn = Box<dyn Fn(&Session) -> bool + Send + Sync>;

/// A CHATHISTORY-style query against a channel's message log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryQuery {
    Before(DateTime<Utc>),
    After(DateTime<Utc>),
    Around(DateTime<Utc>),
    Latest,
    Between(DateTime<Utc>, DateTime<Utc>),
}

/// One row of a channel listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelListing {
    pub name: String,
    pub position: u32,
    pub topic: String,
}

struct Listener {
    id: u64,
    scope: Option<Snowflake>,
    tx: mpsc::Sender<SessionEvent>,
}

/// Handle to one shared backend session.
///
/// Reference counted by the registry: connections retain a reference
/// while attached, and the session shuts its backend connection down when
/// the last reference is released. A session must never be torn down
/// while a listener remains registered; listeners hold an `Arc` through
/// their [`ListenerGuard`].
pub struct Session {
    account: Account,
    refs: AtomicU32,
    reqs: mpsc::Sender<Request>,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
    remove: RemoveFn,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("refs", &self.refs)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Take ownership of a backend connection and start its actor task.
    pub(crate) fn spawn(
        client: Box<dyn Client>,
        renderer: Arc<dyn Render>,
        remove: RemoveFn,
    ) -> Arc<Session> {
        let account = client.account().clone();
        let (reqs, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let session = Arc::new(Session {
            account,
            refs: AtomicU32::new(0),
            reqs,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            remove,
        });
        tokio::spawn(actor::run(Arc::clone(&session), client, renderer, rx));
        session
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn user_id(&self) -> Snowflake {
        self.account.id
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    /// Take one reference. Callers must hold the registrar's lock.
    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the reference count without any registrar involvement.
    /// Returns whether this was the last reference.
    pub(crate) fn release_ref(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Drop one reference; shuts the session down when it was the last.
    ///
    /// The was-it-last decision is delegated to the registrar so it
    /// happens under the same lock that hands out new references.
    pub async fn release(self: &Arc<Self>) {
        if (self.remove)(self) {
            let _ = self.reqs.send(Request::Shutdown).await;
        }
    }

    /// Register an event listener.
    ///
    /// `scope` limits delivery to one guild's events; account-wide events
    /// reach every listener. The listener lives until the returned guard
    /// is dropped or it stalls past [`BROADCAST_TIMEOUT`].
    pub fn subscribe(
        self: &Arc<Self>,
        scope: Option<Snowflake>,
    ) -> (mpsc::Receiver<SessionEvent>, ListenerGuard) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push(Listener { id, scope, tx });
        let guard = ListenerGuard {
            session: Arc::clone(self),
            id,
        };
        (rx, guard)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver an event to every listener in scope, waiting at most
    /// [`BROADCAST_TIMEOUT`] per listener before dropping it.
    pub(crate) async fn broadcast(&self, event: SessionEvent, scope: Option<Snowflake>) {
        let targets: Vec<(u64, mpsc::Sender<SessionEvent>)> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| scope.is_none() || l.scope == scope)
            .map(|l| (l.id, l.tx.clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send_timeout(event.clone(), BROADCAST_TIMEOUT).await.is_err() {
                warn!(user = %self.account.id, listener = id, "dropping stalled event listener");
                self.listeners.lock().retain(|l| l.id != id);
            }
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, BackendError>>) -> Request,
    ) -> Result<T, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.reqs
            .send(build(tx))
            .await
            .map_err(|_| BackendError::Closed)?;
        rx.await.map_err(|_| BackendError::Closed)?
    }

    /// Check that the account is a member of `guild`.
    pub async fn validate_guild(&self, guild: Snowflake) -> Result<(), BackendError> {
        self.request(|reply| Request::ValidateGuild { guild, reply })
            .await
    }

    pub async fn guild_name(&self, guild: Snowflake) -> Result<String, BackendError> {
        self.request(|reply| Request::GuildName { guild, reply })
            .await
    }

    /// The creation time of a guild, or of the account for the direct
    /// message scope. Snowflakes carry this, so no round trip is needed.
    pub fn guild_date(&self, guild: Option<Snowflake>) -> DateTime<Utc> {
        guild.unwrap_or(self.account.id).timestamp()
    }

    pub async fn send_message(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
        content: &str,
    ) -> Result<(), BackendError> {
        self.request(|reply| Request::SendMessage {
            guild,
            channel: channel.to_owned(),
            content: content.to_owned(),
            reply,
        })
        .await
    }

    /// Resolve an IRC channel name, erroring if the guild has no such
    /// channel.
    pub async fn resolve_channel(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<(), BackendError> {
        self.request(|reply| Request::ResolveChannel {
            guild,
            channel: channel.to_owned(),
            reply,
        })
        .await
    }

    pub async fn channel_topic(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<String, BackendError> {
        self.request(|reply| Request::ChannelTopic {
            guild,
            channel: channel.to_owned(),
            reply,
        })
        .await
    }

    pub async fn channel_created(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        self.request(|reply| Request::ChannelCreated {
            guild,
            channel: channel.to_owned(),
            reply,
        })
        .await
    }

    /// The nicknames of a channel's members.
    pub async fn channel_names(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<Vec<String>, BackendError> {
        self.request(|reply| Request::ChannelNames {
            guild,
            channel: channel.to_owned(),
            reply,
        })
        .await
    }

    pub async fn list_channels(
        &self,
        guild: Option<Snowflake>,
    ) -> Result<Vec<ChannelListing>, BackendError> {
        self.request(|reply| Request::ListChannels { guild, reply })
            .await
    }

    /// Resolve a nickname back to its user.
    pub async fn whois(
        &self,
        guild: Option<Snowflake>,
        nickname: &str,
    ) -> Result<EventUser, BackendError> {
        self.request(|reply| Request::Whois {
            guild,
            nickname: nickname.to_owned(),
            reply,
        })
        .await
    }

    pub async fn history(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
        query: HistoryQuery,
        limit: usize,
    ) -> Result<Vec<MessageEvent>, BackendError> {
        self.request(|reply| Request::History {
            guild,
            channel: channel.to_owned(),
            query,
            limit,
            reply,
        })
        .await
    }

    pub async fn typing(
        &self,
        guild: Option<Snowflake>,
        channel: &str,
    ) -> Result<(), BackendError> {
        self.request(|reply| Request::Typing {
            guild,
            channel: channel.to_owned(),
            reply,
        })
        .await
    }

    /// Ask the backend to push typing events for a guild.
    pub async fn typing_subscribe(&self, guild: Snowflake) -> Result<(), BackendError> {
        self.request(|reply| Request::TypingSubscribe { guild, reply })
            .await
    }

    /// The account's own nickname within a guild scope.
    pub async fn nick_name(&self, guild: Option<Snowflake>) -> Result<String, BackendError> {
        self.request(|reply| Request::NickName { guild, reply })
            .await
    }

    /// The account's own username.
    pub async fn user_name(&self) -> Result<String, BackendError> {
        self.request(|reply| Request::UserName { reply }).await
    }
}

/// Unregisters its listener on drop. Holds the session alive, which keeps
/// the no-listeners-after-teardown invariant trivially true.
pub struct ListenerGuard {
    session: Arc<Session>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.session.listeners.lock().retain(|l| l.id != self.id);
    }
}

/// A remove callback for sessions with no registrar: a plain decrement.
pub(crate) fn detached_remove() -> RemoveFn {
    Box::new(Session::release_ref)
}
