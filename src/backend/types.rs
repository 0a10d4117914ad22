//! Data types shared with the chat backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Epoch for snowflake timestamp derivation, milliseconds since the Unix
/// epoch. Snowflakes encode their creation time in the upper 42 bits.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_420_070_400_000;

/// A backend-issued opaque identifier.
///
/// Zero is never issued by the backend and marks an invalid/absent id.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, Debug,
)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Whether this is a real backend id.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The creation time encoded in the id's upper bits.
    pub fn timestamp(self) -> DateTime<Utc> {
        let ms = SNOWFLAKE_EPOCH_MS + (self.0 >> 22) as i64;
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    /// The smallest snowflake whose timestamp is not before `t`.
    ///
    /// Used to turn CHATHISTORY timestamp anchors into id anchors.
    pub fn from_timestamp(t: DateTime<Utc>) -> Snowflake {
        let ms = t.timestamp_millis().saturating_sub(SNOWFLAKE_EPOCH_MS);
        if ms <= 0 {
            return Snowflake(0);
        }
        Snowflake((ms as u64) << 22)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Snowflake)
    }
}

/// The identity of the backend account a session represents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Snowflake,
    pub username: String,
}

/// A backend user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
}

/// A guild member: a user plus their optional per-guild nickname.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
}

/// A guild (one chat "server" on the backend).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GuildInfo {
    pub id: Snowflake,
    pub name: String,
}

/// A channel within a guild (or a direct-message channel when `guild_id`
/// is absent).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: u32,
}

/// A message as the backend stores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub member: Option<Member>,
    pub content: String,
}

/// A typing notification from the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingStart {
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub user_id: Snowflake,
    #[serde(default)]
    pub member: Option<Member>,
    pub timestamp: i64,
}

/// The initial state snapshot for one guild, delivered at ready time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GuildSnapshot {
    pub guild: GuildInfo,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// An asynchronous event pushed by the backend connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Connection established and identified; carries the initial state.
    Ready {
        account: Account,
        guilds: Vec<GuildSnapshot>,
    },
    MessageCreate(ChatMessage),
    TypingStart(TypingStart),
    /// A member's nickname or username changed.
    MemberUpdate {
        guild_id: Snowflake,
        user: User,
        nick: Option<String>,
    },
    /// A channel was created or renamed.
    ChannelUpdate(ChannelInfo),
}
