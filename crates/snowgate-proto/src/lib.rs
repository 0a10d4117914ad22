//! IRC wire protocol support for snowgate.
//!
//! This crate carries everything snowgate needs to speak IRC on the wire:
//! an owned [`Message`] model with IRCv3 tags and prefixes, a line parser
//! and serializer, and (behind the default `tokio` feature) a
//! [`LineCodec`](transport::LineCodec) for framed async transports.
//!
//! It intentionally models the command as a plain string: the gateway only
//! accepts a small command surface and dispatches on command names.

pub mod error;
pub mod message;
pub mod prefix;
pub mod tags;

#[cfg(feature = "tokio")]
pub mod transport;

pub use error::MessageParseError;
pub use message::{Message, Tag};
pub use prefix::Prefix;

#[cfg(feature = "tokio")]
pub use transport::LineCodec;

/// Format a timestamp as an IRCv3 `server-time` tag value.
///
/// The format is fixed by the server-time specification:
/// `YYYY-MM-DDThh:mm:ss.sssZ`, always UTC.
pub fn server_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse a `server-time` / CHATHISTORY `timestamp=` value.
pub fn parse_server_time(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3fZ")
        .ok()
        .map(|naive| naive.and_utc())
}
