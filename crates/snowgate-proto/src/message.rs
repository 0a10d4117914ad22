//! The owned IRC message model: parsing, construction, serialization.
//!
//! A [`Message`] is the complete parsed representation of one IRC line:
//! optional IRCv3 tags, an optional prefix/source, a command, and its
//! parameters. The final parameter is serialized as a trailing parameter
//! (`:`-prefixed) whenever the wire format requires it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::MessageParseError;
use crate::prefix::Prefix;
use crate::tags::{escape_tag_value, unescape_tag_value};

/// Maximum accepted line length including tags, per IRCv3 message-tags
/// (8191 bytes of tags + 512 bytes of message).
pub const MAX_LINE_LEN: usize = 8703;

/// An IRCv3 message tag: key and optional value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tag(pub String, pub Option<String>);

impl Tag {
    /// Create a new tag with a key and optional value.
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Tag(key.into(), value)
    }
}

/// An owned IRC message.
///
/// # Example
///
/// ```
/// use snowgate_proto::Message;
///
/// let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
/// assert_eq!(msg.command, "PRIVMSG");
/// assert_eq!(msg.params, vec!["#channel", "Hello!"]);
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    /// IRCv3 message tags (e.g., `time`, `msgid`).
    pub tags: Option<Vec<Tag>>,
    /// Message prefix/source (e.g., `nick!user@host`).
    pub prefix: Option<Prefix>,
    /// The IRC command or numeric, uppercased on parse.
    pub command: String,
    /// Command parameters, trailing parameter included as the last entry.
    pub params: Vec<String>,
}

impl Message {
    /// Create a message from a command and parameters, no tags or prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Message {
            tags: None,
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Set the prefix/source of this message.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Add a single IRCv3 tag to this message.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        let tag = Tag::new(key, value);
        match self.tags {
            Some(ref mut tags) => tags.push(tag),
            None => self.tags = Some(vec![tag]),
        }
        self
    }

    /// Get a parameter by index.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Get the value of an IRCv3 tag by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .as_ref()?
            .iter()
            .find(|Tag(k, _)| k == key)
            .and_then(|Tag(_, v)| v.as_deref())
    }
}

fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(';')
        .filter(|s| !s.is_empty())
        .map(|tag| {
            let mut iter = tag.splitn(2, '=');
            let key = iter.next().unwrap_or("");
            let value = iter.next().map(unescape_tag_value);
            Tag(key.to_owned(), value)
        })
        .collect()
}

fn valid_command(cmd: &str) -> bool {
    !cmd.is_empty()
        && (cmd.chars().all(|c| c.is_ascii_alphabetic())
            || (cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit())))
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        let mut rest = s.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }
        if rest.len() > MAX_LINE_LEN {
            return Err(MessageParseError::LineTooLong(rest.len()));
        }

        let tags = if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = tagged
                .split_once(' ')
                .ok_or(MessageParseError::MissingCommand)?;
            rest = remainder.trim_start_matches(' ');
            Some(parse_tags(raw_tags))
        } else {
            None
        };

        let prefix = if let Some(prefixed) = rest.strip_prefix(':') {
            let (raw_prefix, remainder) = prefixed
                .split_once(' ')
                .ok_or(MessageParseError::MissingCommand)?;
            if raw_prefix.is_empty() || raw_prefix.chars().any(|c| c.is_control()) {
                return Err(MessageParseError::InvalidPrefix(raw_prefix.to_owned()));
            }
            rest = remainder.trim_start_matches(' ');
            Some(Prefix::new_from_str(raw_prefix))
        } else {
            None
        };

        let mut params = Vec::new();
        let command = match rest.split_once(' ') {
            Some((cmd, param_str)) => {
                let mut param_rest = param_str;
                loop {
                    param_rest = param_rest.trim_start_matches(' ');
                    if param_rest.is_empty() {
                        break;
                    }
                    if let Some(trailing) = param_rest.strip_prefix(':') {
                        params.push(trailing.to_owned());
                        break;
                    }
                    match param_rest.split_once(' ') {
                        Some((param, remainder)) => {
                            params.push(param.to_owned());
                            param_rest = remainder;
                        }
                        None => {
                            params.push(param_rest.to_owned());
                            break;
                        }
                    }
                }
                cmd
            }
            None => rest,
        };

        if !valid_command(command) {
            return Err(MessageParseError::InvalidCommand(command.to_owned()));
        }

        Ok(Message {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ref tags) = self.tags {
            write!(f, "@")?;
            for (i, tag) in tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                write!(f, "{}", tag.0)?;
                if let Some(ref value) = tag.1 {
                    write!(f, "=")?;
                    escape_tag_value(f, value)?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        write!(f, "{}", self.command)?;

        let last = self.params.len().checked_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_trailing =
                param.is_empty() || param.starts_with(':') || param.contains(' ');
            if Some(i) == last && needs_trailing {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }

        write!(f, "\r\n")
    }
}
