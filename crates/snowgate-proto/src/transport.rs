//! Framed IRC transport: a tokio codec producing and consuming [`Message`]s.
//!
//! The gateway frames its client connections with [`LineCodec`] via
//! `tokio_util::codec::Framed`. Lines that fail to parse are surfaced as
//! decode errors so the connection driver can decide whether to drop the
//! line or the connection.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MessageParseError;
use crate::message::{Message, MAX_LINE_LEN};

/// Codec errors: transport I/O or line parse failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] MessageParseError),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// A line-delimited IRC message codec.
///
/// Decodes `\r\n`- (or bare `\n`-) terminated lines into [`Message`]s and
/// encodes messages through their `Display` form, which appends `\r\n`.
#[derive(Debug, Default)]
pub struct LineCodec {
    // Scan position within the buffer, so partial lines are not rescanned.
    next_index: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|&b| b == b'\n') else {
                if src.len() > MAX_LINE_LEN {
                    let len = src.len();
                    src.clear();
                    self.next_index = 0;
                    return Err(MessageParseError::LineTooLong(len).into());
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            let line = src.split_to(line_end + 1);
            self.next_index = 0;

            let line = std::str::from_utf8(&line).map_err(|_| CodecError::InvalidUtf8)?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue; // empty lines are silently skipped
            }

            return Ok(Some(trimmed.parse::<Message>()?));
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = msg.to_string();
        dst.reserve(line.len());
        dst.put(line.as_bytes());
        Ok(())
    }
}
