//! IRC reply constructors.
//!
//! Every server-originated line the engine can emit is built here, so the
//! numeric formats live in one place. Constructors take the server prefix
//! and the client's current nick explicitly; the engine decorates the
//! result with IRCv3 tags where capabilities allow.

use chrono::{DateTime, Utc};
use snowgate_proto::{Message, Prefix};

use super::backend::ListEntry;

fn numeric(server: &Prefix, command: &str, params: Vec<String>) -> Message {
    Message::new(command, params).with_prefix(server.clone())
}

pub fn cap_ls(server: &Prefix, nick: &str, caps: &str) -> Message {
    numeric(
        server,
        "CAP",
        vec![nick.to_owned(), "LS".to_owned(), caps.to_owned()],
    )
}

pub fn cap_list(server: &Prefix, nick: &str, caps: &str) -> Message {
    numeric(
        server,
        "CAP",
        vec![nick.to_owned(), "LIST".to_owned(), caps.to_owned()],
    )
}

pub fn cap_ack(server: &Prefix, nick: &str, caps: &str) -> Message {
    numeric(
        server,
        "CAP",
        vec![nick.to_owned(), "ACK".to_owned(), caps.to_owned()],
    )
}

pub fn cap_nak(server: &Prefix, nick: &str, caps: &str) -> Message {
    numeric(
        server,
        "CAP",
        vec![nick.to_owned(), "NAK".to_owned(), caps.to_owned()],
    )
}

pub fn authenticate_continue() -> Message {
    Message::new("AUTHENTICATE", vec!["+".to_owned()])
}

pub fn logged_in(server: &Prefix, nick: &str, client: &Prefix, account: &str) -> Message {
    numeric(
        server,
        "900",
        vec![
            nick.to_owned(),
            client.to_string(),
            account.to_owned(),
            format!("You are now logged in as {}", account),
        ],
    )
}

pub fn sasl_success(server: &Prefix, nick: &str) -> Message {
    numeric(
        server,
        "903",
        vec![
            nick.to_owned(),
            "SASL authentication successful".to_owned(),
        ],
    )
}

pub fn welcome(server: &Prefix, nick: &str, network: &str) -> Message {
    numeric(
        server,
        "001",
        vec![
            nick.to_owned(),
            format!("Welcome to {}, {}", network, nick),
        ],
    )
}

pub fn your_host(server: &Prefix, nick: &str, server_name: &str, version: &str) -> Message {
    numeric(
        server,
        "002",
        vec![
            nick.to_owned(),
            format!("Your host is {}, running {}", server_name, version),
        ],
    )
}

pub fn created(server: &Prefix, nick: &str, t: DateTime<Utc>) -> Message {
    numeric(
        server,
        "003",
        vec![
            nick.to_owned(),
            format!("This server was created {}", t.to_rfc2822()),
        ],
    )
}

pub fn motd_start(server: &Prefix, nick: &str, server_name: &str) -> Message {
    numeric(
        server,
        "375",
        vec![
            nick.to_owned(),
            format!("- {} Message of the day -", server_name),
        ],
    )
}

pub fn motd_line(server: &Prefix, nick: &str, line: &str) -> Message {
    numeric(
        server,
        "372",
        vec![nick.to_owned(), format!("- {}", line)],
    )
}

pub fn end_of_motd(server: &Prefix, nick: &str) -> Message {
    numeric(
        server,
        "376",
        vec![nick.to_owned(), "End of /MOTD command".to_owned()],
    )
}

pub fn pong(server: &Prefix, nonce: &str) -> Message {
    numeric(server, "PONG", vec![nonce.to_owned()])
}

pub fn join(client: &Prefix, channel: &str) -> Message {
    Message::new("JOIN", vec![channel.to_owned()]).with_prefix(client.clone())
}

pub fn topic(server: &Prefix, nick: &str, channel: &str, topic: &str) -> Message {
    numeric(
        server,
        "332",
        vec![nick.to_owned(), channel.to_owned(), topic.to_owned()],
    )
}

pub fn no_topic(server: &Prefix, nick: &str, channel: &str) -> Message {
    numeric(
        server,
        "331",
        vec![
            nick.to_owned(),
            channel.to_owned(),
            "No topic is set".to_owned(),
        ],
    )
}

pub fn creation_time(server: &Prefix, nick: &str, channel: &str, t: DateTime<Utc>) -> Message {
    numeric(
        server,
        "329",
        vec![
            nick.to_owned(),
            channel.to_owned(),
            t.timestamp().to_string(),
        ],
    )
}

pub fn nam_reply(server: &Prefix, nick: &str, channel: &str, name: &str) -> Message {
    numeric(
        server,
        "353",
        vec![
            nick.to_owned(),
            "=".to_owned(),
            channel.to_owned(),
            name.to_owned(),
        ],
    )
}

pub fn end_of_names(server: &Prefix, nick: &str, channel: &str) -> Message {
    numeric(
        server,
        "366",
        vec![
            nick.to_owned(),
            channel.to_owned(),
            "End of /NAMES list".to_owned(),
        ],
    )
}

pub fn list_start(server: &Prefix, nick: &str) -> Message {
    numeric(
        server,
        "321",
        vec![nick.to_owned(), "Channel list".to_owned()],
    )
}

pub fn list_entry(server: &Prefix, nick: &str, entry: &ListEntry) -> Message {
    numeric(
        server,
        "322",
        vec![
            nick.to_owned(),
            entry.channel.clone(),
            entry.users.to_string(),
            entry.topic.clone(),
        ],
    )
}

pub fn list_end(server: &Prefix, nick: &str) -> Message {
    numeric(
        server,
        "323",
        vec![nick.to_owned(), "End of /LIST".to_owned()],
    )
}

pub fn whois_user(server: &Prefix, nick: &str, target: &Prefix, realname: &str) -> Message {
    let (tnick, tuser, thost) = match target {
        Prefix::Nickname(n, u, h) => (n.as_str(), u.as_str(), h.as_str()),
        Prefix::ServerName(n) => (n.as_str(), "", ""),
    };
    numeric(
        server,
        "311",
        vec![
            nick.to_owned(),
            tnick.to_owned(),
            tuser.to_owned(),
            thost.to_owned(),
            "*".to_owned(),
            realname.to_owned(),
        ],
    )
}

pub fn whois_server(
    server: &Prefix,
    nick: &str,
    target: &str,
    server_name: &str,
    info: &str,
) -> Message {
    numeric(
        server,
        "312",
        vec![
            nick.to_owned(),
            target.to_owned(),
            server_name.to_owned(),
            info.to_owned(),
        ],
    )
}

pub fn whois_operator(server: &Prefix, nick: &str, target: &str) -> Message {
    numeric(
        server,
        "313",
        vec![
            nick.to_owned(),
            target.to_owned(),
            "is an IRC operator".to_owned(),
        ],
    )
}

pub fn whois_idle(server: &Prefix, nick: &str, target: &str, idle_secs: i64) -> Message {
    numeric(
        server,
        "317",
        vec![
            nick.to_owned(),
            target.to_owned(),
            idle_secs.to_string(),
            "seconds idle".to_owned(),
        ],
    )
}

pub fn whois_channels(server: &Prefix, nick: &str, target: &str, channels: &[String]) -> Message {
    numeric(
        server,
        "319",
        vec![nick.to_owned(), target.to_owned(), channels.join(" ")],
    )
}

pub fn end_of_whois(server: &Prefix, nick: &str, target: &str) -> Message {
    numeric(
        server,
        "318",
        vec![
            nick.to_owned(),
            target.to_owned(),
            "End of /WHOIS list".to_owned(),
        ],
    )
}

pub fn nick_change(old: &Prefix, new_nick: &str) -> Message {
    Message::new("NICK", vec![new_nick.to_owned()]).with_prefix(old.clone())
}

pub fn batch_start(server: &Prefix, id: &str, kind: &str, target: &str) -> Message {
    numeric(
        server,
        "BATCH",
        vec![format!("+{}", id), kind.to_owned(), target.to_owned()],
    )
}

pub fn batch_end(server: &Prefix, id: &str) -> Message {
    numeric(server, "BATCH", vec![format!("-{}", id)])
}

pub fn privmsg(author: &Prefix, channel: &str, line: &str) -> Message {
    Message::new("PRIVMSG", vec![channel.to_owned(), line.to_owned()])
        .with_prefix(author.clone())
}

pub fn tagmsg_typing(author: &Prefix, channel: &str) -> Message {
    Message::new("TAGMSG", vec![channel.to_owned()])
        .with_prefix(author.clone())
        .with_tag("+typing", Some("active".to_owned()))
}

pub fn error(reason: &str) -> Message {
    Message::new("ERROR", vec![reason.to_owned()])
}
