//! Markdown to IRC formatting.
//!
//! Translates the backend's lightweight markup into mIRC control codes.
//! IRC formatting codes are toggles, so a delimiter pair becomes the same
//! control character at both ends.

use crate::backend::ChatMessage;

const BOLD: char = '\x02';
const ITALIC: char = '\x1d';
const UNDERLINE: char = '\x1f';
const STRIKETHROUGH: char = '\x1e';
const MONOSPACE: char = '\x11';

/// Renders backend content for IRC delivery.
pub trait Render: Send + Sync {
    /// Translate raw markup into an IRC-formatted string.
    fn content(&self, raw: &str) -> String;

    /// Render a full message. Currently just the content; attachments and
    /// embeds would hang off this.
    fn message(&self, msg: &ChatMessage) -> String {
        self.content(&msg.content)
    }
}

/// The default renderer: inline markdown spans, fenced code, and
/// backslash escapes.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkupRenderer;

/// Two-character delimiters, checked before their one-character prefixes.
const WIDE_DELIMITERS: [(&str, char); 3] = [
    ("**", BOLD),
    ("__", UNDERLINE),
    ("~~", STRIKETHROUGH),
];

impl Render for MarkupRenderer {
    fn content(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut open: Vec<&str> = Vec::new();
        let mut rest = raw;

        'outer: while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('\\') {
                // a backslash protects the next character from markup
                let mut chars = after.chars();
                match chars.next() {
                    Some(c) => {
                        out.push(c);
                        rest = chars.as_str();
                    }
                    None => {
                        out.push('\\');
                        rest = after;
                    }
                }
                continue;
            }

            if let Some(after) = rest.strip_prefix("```") {
                // fenced code: monospace verbatim, fence language dropped
                let block = after.strip_prefix(|c: char| c != '\n').map_or(after, |_| {
                    match after.split_once('\n') {
                        Some((_, body)) => body,
                        None => after,
                    }
                });
                match block.split_once("```") {
                    Some((body, tail)) => {
                        out.push(MONOSPACE);
                        out.push_str(body.trim_matches('\n'));
                        out.push(MONOSPACE);
                        rest = tail;
                    }
                    None => {
                        out.push_str("```");
                        rest = after;
                    }
                }
                continue;
            }

            if let Some(after) = rest.strip_prefix('`') {
                // inline code suppresses all other markup
                match after.split_once('`') {
                    Some((body, tail)) => {
                        out.push(MONOSPACE);
                        out.push_str(body);
                        out.push(MONOSPACE);
                        rest = tail;
                    }
                    None => {
                        out.push('`');
                        rest = after;
                    }
                }
                continue;
            }

            for (delim, code) in WIDE_DELIMITERS {
                if let Some(after) = rest.strip_prefix(delim) {
                    if !toggle(&mut open, &mut out, delim, code, after) {
                        // an unmatched double delimiter is plain text, and
                        // must not fall through to its single-char prefix
                        out.push_str(delim);
                    }
                    rest = after;
                    continue 'outer;
                }
            }

            for delim in ["*", "_"] {
                if let Some(after) = rest.strip_prefix(delim) {
                    if toggle(&mut open, &mut out, delim, ITALIC, after) {
                        rest = after;
                        continue 'outer;
                    }
                }
            }

            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }

        // unbalanced spans at end of input still need their closing toggle
        for delim in open.iter().rev() {
            out.push(code_for(delim));
        }
        out
    }
}

fn code_for(delim: &str) -> char {
    for (wide, code) in WIDE_DELIMITERS {
        if wide == delim {
            return code;
        }
    }
    ITALIC
}

/// Emit the toggle for `delim` if it closes an open span or opens one
/// with a closer ahead in `after`. Returns false when the delimiter is
/// plain text.
fn toggle(open: &mut Vec<&str>, out: &mut String, delim: &'static str, code: char, after: &str) -> bool {
    if open.last() == Some(&delim) {
        out.push(code);
        open.pop();
        true
    } else if after.contains(delim) && !open.contains(&delim) {
        out.push(code);
        open.push(delim);
        true
    } else {
        false
    }
}
