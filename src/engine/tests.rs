use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use snowgate_proto::{Message, Prefix};
use tokio::sync::mpsc;

use super::*;
use crate::backend::BackendError;

#[derive(Default)]
struct FakeBackend {
    calls: Vec<String>,
    topic: String,
    created: Option<DateTime<Utc>>,
    names: Vec<String>,
    history: Vec<HistoryMessage>,
    missing_channels: Vec<String>,
    register_prefix: Option<Prefix>,
    login: Option<Login>,
}

#[async_trait]
impl Backend for FakeBackend {
    async fn network_name(&mut self) -> Result<String, BackendError> {
        Ok("testnet".to_owned())
    }

    async fn server_name(&mut self) -> Result<String, BackendError> {
        Ok("gate.test".to_owned())
    }

    async fn server_version(&mut self) -> Result<String, BackendError> {
        Ok("snowgate-test".to_owned())
    }

    async fn server_created(&mut self) -> Result<DateTime<Utc>, BackendError> {
        Ok(DateTime::from_timestamp(1_600_000_000, 0).unwrap())
    }

    async fn motd(&mut self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["welcome aboard".to_owned()])
    }

    async fn handle_nickname(&mut self, nickname: &str) -> Result<String, BackendError> {
        self.calls.push(format!("nickname {}", nickname));
        Ok(nickname.to_owned())
    }

    async fn handle_username(&mut self, username: &str) -> Result<String, BackendError> {
        self.calls.push(format!("username {}", username));
        Ok(username.to_owned())
    }

    async fn handle_realname(&mut self, realname: &str) -> Result<String, BackendError> {
        self.calls.push(format!("realname {}", realname));
        Ok(realname.to_owned())
    }

    async fn handle_password(&mut self, password: &str) -> Result<String, BackendError> {
        self.calls.push(format!("password {}", password));
        Ok(password.to_owned())
    }

    async fn handle_ping(&mut self, nonce: &str) -> Result<String, BackendError> {
        Ok(nonce.to_owned())
    }

    async fn handle_register(&mut self, login: &Login) -> Result<Option<Prefix>, BackendError> {
        self.calls.push("register".to_owned());
        self.login = Some(login.clone());
        Ok(self.register_prefix.clone())
    }

    async fn handle_join(&mut self, channel: &str) -> Result<(), BackendError> {
        self.calls.push(format!("join {}", channel));
        if self.missing_channels.iter().any(|c| c == channel) {
            return Err(BackendError::NoSuchChannel(channel.to_owned()));
        }
        Ok(())
    }

    async fn handle_topic(&mut self, _channel: &str) -> Result<String, BackendError> {
        Ok(self.topic.clone())
    }

    async fn handle_creation_time(
        &mut self,
        _channel: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        Ok(self.created)
    }

    async fn handle_names(&mut self, _channel: &str) -> Result<Vec<String>, BackendError> {
        Ok(self.names.clone())
    }

    async fn handle_message(
        &mut self,
        channel: &str,
        content: &str,
    ) -> Result<(), BackendError> {
        self.calls.push(format!("message {} {}", channel, content));
        Ok(())
    }

    async fn handle_list(&mut self) -> Result<Vec<ListEntry>, BackendError> {
        Ok(vec![ListEntry {
            channel: "#general".to_owned(),
            users: 3,
            topic: "the topic".to_owned(),
        }])
    }

    async fn handle_whois(&mut self, user: &str) -> Result<WhoisReply, BackendError> {
        Ok(WhoisReply {
            prefix: Prefix::new(user, user, "1234"),
            realname: user.to_owned(),
            server: "gate.test".to_owned(),
            server_info: "testnet".to_owned(),
            is_operator: false,
            last_active: None,
            channels: vec!["#general".to_owned()],
        })
    }

    async fn handle_history_before(
        &mut self,
        target: &str,
        _before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.calls.push(format!("history-before {} {}", target, limit));
        Ok(self.history.clone())
    }

    async fn handle_history_after(
        &mut self,
        target: &str,
        _after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.calls.push(format!("history-after {} {}", target, limit));
        Ok(self.history.clone())
    }

    async fn handle_history_latest(
        &mut self,
        target: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.calls.push(format!("history-latest {} {}", target, limit));
        Ok(self.history.clone())
    }

    async fn handle_history_around(
        &mut self,
        target: &str,
        _around: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.calls.push(format!("history-around {} {}", target, limit));
        Ok(self.history.clone())
    }

    async fn handle_history_between(
        &mut self,
        target: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        self.calls.push(format!("history-between {} {}", target, limit));
        Ok(self.history.clone())
    }

    async fn handle_typing_active(&mut self, channel: &str) -> Result<(), BackendError> {
        self.calls.push(format!("typing-active {}", channel));
        Ok(())
    }

    async fn handle_typing_paused(&mut self, channel: &str) -> Result<(), BackendError> {
        self.calls.push(format!("typing-paused {}", channel));
        Ok(())
    }

    async fn handle_typing_done(&mut self, channel: &str) -> Result<(), BackendError> {
        self.calls.push(format!("typing-done {}", channel));
        Ok(())
    }
}

fn make_engine(backend: FakeBackend) -> (Engine<FakeBackend>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Engine::new(backend, tx, "gate.test", "127.0.0.1"), rx)
}

async fn feed(engine: &mut Engine<FakeBackend>, line: &str) -> Result<(), EngineError> {
    engine.handle(&line.parse::<Message>().unwrap()).await
}

async fn register(engine: &mut Engine<FakeBackend>) {
    feed(engine, "NICK ada").await.unwrap();
    feed(engine, "USER ada 0 * :Ada L").await.unwrap();
    assert!(engine.is_registered());
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn commands(msgs: &[Message]) -> Vec<&str> {
    msgs.iter().map(|m| m.command.as_str()).collect()
}

#[tokio::test]
async fn registration_completes_after_nick_and_user() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "NICK ada").await.unwrap();
    assert!(!engine.is_registered());
    assert!(drain(&mut rx).is_empty());

    feed(&mut engine, "USER ada 0 * :Ada L").await.unwrap();
    assert!(engine.is_registered());

    let burst = drain(&mut rx);
    assert_eq!(
        commands(&burst),
        vec!["001", "002", "003", "375", "372", "376"]
    );
    assert_eq!(burst[0].params[0], "ada");
    assert_eq!(
        engine.backend().calls.iter().filter(|c| *c == "register").count(),
        1
    );
}

#[tokio::test]
async fn backend_assigned_prefix_wins() {
    let backend = FakeBackend {
        register_prefix: Some(Prefix::new("ada#1", "ada", "42")),
        ..FakeBackend::default()
    };
    let (mut engine, mut rx) = make_engine(backend);
    register(&mut engine).await;
    assert_eq!(engine.client_prefix().to_string(), "ada#1!ada@42");
    assert_eq!(drain(&mut rx)[0].params[0], "ada#1");
}

#[tokio::test]
async fn cap_ls_blocks_registration_until_end() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "CAP LS 302").await.unwrap();
    let ls = drain(&mut rx);
    assert_eq!(ls[0].command, "CAP");
    assert!(ls[0].params[2].contains("sasl=PLAIN"));
    assert!(ls[0].params[2].contains("draft/chathistory"));

    register_blocked(&mut engine).await;

    feed(&mut engine, "CAP END").await.unwrap();
    assert!(engine.is_registered());
}

async fn register_blocked(engine: &mut Engine<FakeBackend>) {
    feed(engine, "NICK ada").await.unwrap();
    feed(engine, "USER ada 0 * :Ada L").await.unwrap();
    assert!(!engine.is_registered());
}

#[tokio::test]
async fn user_after_registration_is_rejected() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    let err = feed(&mut engine, "USER x 0 * :x").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRegistered));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn cap_req_with_unknown_capability_naks_everything() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "CAP REQ :server-time bogus-cap").await.unwrap();
    let reply = drain(&mut rx);
    assert_eq!(reply[0].params[1], "NAK");
    assert_eq!(reply[0].params[2], "server-time bogus-cap");
    assert!(!engine.has_capability("server-time"));
}

#[tokio::test]
async fn cap_req_ack_enables_and_list_shows() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "CAP REQ :server-time batch").await.unwrap();
    assert_eq!(drain(&mut rx)[0].params[1], "ACK");
    assert!(engine.has_capability("server-time"));
    assert!(engine.has_capability("batch"));

    feed(&mut engine, "CAP REQ :-batch").await.unwrap();
    drain(&mut rx);
    assert!(!engine.has_capability("batch"));

    feed(&mut engine, "CAP LIST").await.unwrap();
    let list = drain(&mut rx);
    assert_eq!(list[0].params[1], "LIST");
    assert_eq!(list[0].params[2], "server-time");
}

#[tokio::test]
async fn sasl_plain_round_trip() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "CAP LS 302").await.unwrap();
    feed(&mut engine, "CAP REQ sasl").await.unwrap();
    feed(&mut engine, "AUTHENTICATE PLAIN").await.unwrap();
    let replies = drain(&mut rx);
    let auth = replies.last().unwrap();
    assert_eq!(auth.command, "AUTHENTICATE");
    assert_eq!(auth.params[0], "+");

    let payload = STANDARD_NO_PAD.encode(b"\x00ada\x00hunter2");
    feed(&mut engine, &format!("AUTHENTICATE {}", payload))
        .await
        .unwrap();
    let replies = drain(&mut rx);
    assert_eq!(commands(&replies), vec!["900", "903"]);

    let sasl = engine.sasl().unwrap();
    assert_eq!(sasl.authzid, "");
    assert_eq!(sasl.authcid, "ada");
    assert_eq!(sasl.password, "hunter2");

    feed(&mut engine, "NICK ada").await.unwrap();
    feed(&mut engine, "USER ada 0 * :Ada L").await.unwrap();
    feed(&mut engine, "CAP END").await.unwrap();
    assert!(engine.is_registered());

    // the SASL password is the credential handed to registration
    let login = engine.backend().login.as_ref().unwrap();
    assert_eq!(login.token(), "hunter2");
}

#[tokio::test]
async fn sasl_fragmented_payload_holds_registration() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    let secret = "p".repeat(400);
    let payload = STANDARD_NO_PAD.encode(format!("\x00ada\x00{}", secret).as_bytes());
    assert!(payload.len() > 400);
    let (first, rest) = payload.split_at(400);

    feed(&mut engine, "AUTHENTICATE PLAIN").await.unwrap();
    feed(&mut engine, &format!("AUTHENTICATE {}", first))
        .await
        .unwrap();

    // an in-flight SASL exchange holds registration open
    feed(&mut engine, "NICK ada").await.unwrap();
    feed(&mut engine, "USER ada 0 * :Ada L").await.unwrap();
    assert!(!engine.is_registered());
    drain(&mut rx);

    feed(&mut engine, &format!("AUTHENTICATE {}", rest))
        .await
        .unwrap();
    assert!(engine.is_registered());
    assert_eq!(engine.sasl().unwrap().password, secret);
}

#[tokio::test]
async fn sasl_plus_terminates_a_full_fragment() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    // 300 plain bytes encode to exactly 400 base64 characters, so the
    // client must send "+" to mark the payload complete.
    let secret = "p".repeat(295);
    let payload = STANDARD_NO_PAD.encode(format!("\x00ada\x00{}", secret).as_bytes());
    assert_eq!(payload.len(), 400);

    feed(&mut engine, "AUTHENTICATE PLAIN").await.unwrap();
    feed(&mut engine, &format!("AUTHENTICATE {}", payload))
        .await
        .unwrap();
    assert!(engine.sasl().is_none());

    feed(&mut engine, "AUTHENTICATE +").await.unwrap();
    assert_eq!(engine.sasl().unwrap().password, secret);
}

#[tokio::test]
async fn sasl_garbage_payload_fails_without_killing_connection() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "AUTHENTICATE PLAIN").await.unwrap();
    let err = feed(&mut engine, "AUTHENTICATE !!!").await.unwrap_err();
    assert!(matches!(err, EngineError::SaslFail(_)));
    assert!(!err.is_fatal());
    let reply = err
        .to_irc_reply(&Prefix::ServerName("gate.test".into()), "*")
        .unwrap();
    assert_eq!(reply.command, "904");
}

#[tokio::test]
async fn join_burst_is_ordered() {
    let backend = FakeBackend {
        topic: "the topic".to_owned(),
        created: Some(DateTime::from_timestamp(1_500_000_000, 0).unwrap()),
        names: vec!["ada".to_owned(), "bob".to_owned()],
        ..FakeBackend::default()
    };
    let (mut engine, mut rx) = make_engine(backend);
    register(&mut engine).await;
    drain(&mut rx);

    feed(&mut engine, "JOIN #general").await.unwrap();
    let burst = drain(&mut rx);
    assert_eq!(
        commands(&burst),
        vec!["JOIN", "332", "329", "353", "353", "366"]
    );
    assert_eq!(burst[0].prefix, Some(Prefix::new("ada", "", "127.0.0.1")));
    assert_eq!(burst[2].params[2], "1500000000");
    assert!(engine.in_channel("#general"));

    // joining again is a no-op
    feed(&mut engine, "JOIN #general").await.unwrap();
    assert!(drain(&mut rx).is_empty());
    assert_eq!(
        engine
            .backend()
            .calls
            .iter()
            .filter(|c| *c == "join #general")
            .count(),
        1
    );
}

#[tokio::test]
async fn join_without_topic_or_creation_time() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);

    feed(&mut engine, "JOIN #empty").await.unwrap();
    let burst = drain(&mut rx);
    assert_eq!(commands(&burst), vec!["JOIN", "331", "366"]);
}

#[tokio::test]
async fn join_unresolvable_channel_is_not_joined() {
    let backend = FakeBackend {
        missing_channels: vec!["#nope".to_owned()],
        ..FakeBackend::default()
    };
    let (mut engine, mut rx) = make_engine(backend);
    register(&mut engine).await;
    drain(&mut rx);

    let err = feed(&mut engine, "JOIN #nope").await.unwrap_err();
    assert!(!err.is_fatal());
    let reply = err
        .to_irc_reply(&Prefix::ServerName("gate.test".into()), "ada")
        .unwrap();
    assert_eq!(reply.command, "403");
    assert!(!engine.in_channel("#nope"));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn privmsg_forwards_to_backend() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    feed(&mut engine, "PRIVMSG #general :hello there")
        .await
        .unwrap();
    assert!(engine
        .backend()
        .calls
        .contains(&"message #general hello there".to_owned()));
}

#[tokio::test]
async fn unregistered_commands_are_rejected() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    let err = feed(&mut engine, "PRIVMSG #general :hi").await.unwrap_err();
    assert!(matches!(err, EngineError::NotRegistered(_)));
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    let err = feed(&mut engine, "KNOCK #general").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownCommand(_)));
}

#[tokio::test]
async fn list_renders_entries() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);

    feed(&mut engine, "LIST").await.unwrap();
    let burst = drain(&mut rx);
    assert_eq!(commands(&burst), vec!["321", "322", "323"]);
    assert_eq!(burst[1].params[1], "#general");
    assert_eq!(burst[1].params[2], "3");
}

#[tokio::test]
async fn whois_renders_reply_family() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);

    feed(&mut engine, "WHOIS bob").await.unwrap();
    let burst = drain(&mut rx);
    assert_eq!(commands(&burst), vec!["311", "312", "319", "318"]);
    assert_eq!(burst[0].params[1], "bob");
}

fn history_fixture() -> Vec<HistoryMessage> {
    vec![
        HistoryMessage {
            channel: "#general".to_owned(),
            content: "first".to_owned(),
            id: "100".to_owned(),
            author: Prefix::new("bob", "bob", "2"),
            date: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
        },
        HistoryMessage {
            channel: "#general".to_owned(),
            content: "second".to_owned(),
            id: "101".to_owned(),
            author: Prefix::new("bob", "bob", "2"),
            date: DateTime::from_timestamp(1_600_000_100, 0).unwrap(),
        },
    ]
}

#[tokio::test]
async fn chathistory_wraps_messages_in_a_named_batch() {
    let backend = FakeBackend {
        history: history_fixture(),
        ..FakeBackend::default()
    };
    let (mut engine, mut rx) = make_engine(backend);
    register(&mut engine).await;
    drain(&mut rx);

    feed(&mut engine, "CHATHISTORY LATEST #general * 50")
        .await
        .unwrap();
    let burst = drain(&mut rx);
    assert_eq!(
        commands(&burst),
        vec!["BATCH", "PRIVMSG", "PRIVMSG", "BATCH"]
    );
    assert_eq!(burst[0].params, vec!["+1", "chathistory", "#general"]);
    assert_eq!(burst[1].tag_value("batch"), Some("1"));
    assert_eq!(burst[3].params, vec!["-1"]);

    // batch ids increment per query
    feed(&mut engine, "CHATHISTORY LATEST #general * 50")
        .await
        .unwrap();
    let burst = drain(&mut rx);
    assert_eq!(burst[0].params[0], "+2");
}

#[tokio::test]
async fn chathistory_selectors_dispatch() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);

    feed(
        &mut engine,
        "CHATHISTORY BEFORE #general timestamp=2023-01-01T00:00:00.000Z 25",
    )
    .await
    .unwrap();
    feed(&mut engine, "CHATHISTORY AROUND #general msgid=123456789 10")
        .await
        .unwrap();
    feed(
        &mut engine,
        "CHATHISTORY BETWEEN #general timestamp=2023-01-01T00:00:00.000Z timestamp=2023-02-01T00:00:00.000Z 50",
    )
    .await
    .unwrap();

    let calls = &engine.backend().calls;
    assert!(calls.contains(&"history-before #general 25".to_owned()));
    assert!(calls.contains(&"history-around #general 10".to_owned()));
    assert!(calls.contains(&"history-between #general 50".to_owned()));
}

#[tokio::test]
async fn chathistory_rejects_bad_input() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;

    let err = feed(&mut engine, "CHATHISTORY LATEST * * 50")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::HistoryFail { .. }));

    let err = feed(&mut engine, "CHATHISTORY LATEST #general yesterday 50")
        .await
        .unwrap_err();
    let reply = err
        .to_irc_reply(&Prefix::ServerName("gate.test".into()), "ada")
        .unwrap();
    assert_eq!(reply.command, "FAIL");
    assert_eq!(reply.params[0], "CHATHISTORY");

    let err = feed(
        &mut engine,
        "CHATHISTORY BETWEEN #general timestamp=2023-01-01T00:00:00.000Z 50",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::NeedMoreParams(_)));
}

#[tokio::test]
async fn tagmsg_typing_maps_to_backend_calls() {
    let (mut engine, _rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;

    feed(&mut engine, "@+typing=active TAGMSG #general")
        .await
        .unwrap();
    feed(&mut engine, "@+typing=paused TAGMSG #general")
        .await
        .unwrap();
    feed(&mut engine, "@+typing=done TAGMSG #general")
        .await
        .unwrap();
    feed(&mut engine, "@+typing=bogus TAGMSG #general")
        .await
        .unwrap();

    let calls = &engine.backend().calls;
    assert!(calls.contains(&"typing-active #general".to_owned()));
    assert!(calls.contains(&"typing-paused #general".to_owned()));
    assert!(calls.contains(&"typing-done #general".to_owned()));
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("typing-")).count(),
        3
    );
}

#[tokio::test]
async fn ping_works_before_registration() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "PING :token").await.unwrap();
    let reply = drain(&mut rx);
    assert_eq!(reply[0].command, "PONG");
    assert_eq!(reply[0].params[0], "token");
}

#[tokio::test]
async fn push_message_splits_lines_and_tags() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    feed(&mut engine, "CAP REQ :server-time message-tags")
        .await
        .unwrap();
    feed(&mut engine, "CAP END").await.unwrap();
    register(&mut engine).await;
    drain(&mut rx);

    let msg = HistoryMessage {
        channel: "#general".to_owned(),
        content: "one\ntwo\n\nthree".to_owned(),
        id: "555".to_owned(),
        author: Prefix::new("bob", "bob", "2"),
        date: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
    };
    engine.push_message(&msg).unwrap();

    let out = drain(&mut rx);
    assert_eq!(out.len(), 3);
    for line in &out {
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.tag_value("msgid"), Some("555"));
        assert!(line.tag_value("time").is_some());
        assert!(line.tag_value("batch").is_none());
    }
    assert_eq!(out[2].params[1], "three");
}

#[tokio::test]
async fn push_typing_requires_message_tags() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);
    let author = Prefix::new("bob", "bob", "2");

    engine.push_typing(&author, "#general", Utc::now()).unwrap();
    assert!(drain(&mut rx).is_empty());

    feed(&mut engine, "CAP REQ message-tags").await.unwrap();
    drain(&mut rx);
    engine.push_typing(&author, "#general", Utc::now()).unwrap();
    let out = drain(&mut rx);
    assert_eq!(out[0].command, "TAGMSG");
    assert_eq!(out[0].tag_value("+typing"), Some("active"));
}

#[tokio::test]
async fn push_nick_change_updates_own_prefix() {
    let (mut engine, mut rx) = make_engine(FakeBackend::default());
    register(&mut engine).await;
    drain(&mut rx);

    let own = engine.client_prefix().clone();
    engine.push_nick_change(&own, "ada#1").unwrap();
    assert_eq!(engine.client_prefix().name(), "ada#1");

    let other = Prefix::new("bob", "bob", "2");
    engine.push_nick_change(&other, "bob#1").unwrap();
    assert_eq!(engine.client_prefix().name(), "ada#1");

    let out = drain(&mut rx);
    assert_eq!(commands(&out), vec!["NICK", "NICK"]);
    assert_eq!(out[1].prefix, Some(other));
}
