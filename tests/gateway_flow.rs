//! End-to-end tests: real TCP clients against a gateway backed by an
//! in-memory world.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer, GENERAL, GUILD};
use snowgate::backend::{ChatMessage, Event, User};

fn guild_pass() -> String {
    format!("tok:{}", GUILD.0)
}

#[tokio::test]
async fn registration_sends_the_welcome_burst() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;

    let burst = client.register(&guild_pass()).await;
    let commands: Vec<&str> = burst.iter().map(|m| m.command.as_str()).collect();
    assert_eq!(commands, vec!["001", "002", "003", "375", "372", "376"]);

    // addressed to the backend nick, welcoming to the guild
    assert_eq!(burst[0].params[0], "ada");
    assert!(burst[0].params[1].contains("testers"));
    assert!(burst[4].params[1].contains("welcome to the test gateway"));
}

#[tokio::test]
async fn network_login_without_a_guild() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;

    let burst = client.register("tok").await;
    assert!(burst[0].params[1].contains("testnet"));
}

#[tokio::test]
async fn join_burst_and_outbound_messages() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;
    client.register(&guild_pass()).await;

    client.send("JOIN #general").await;
    let join = client.recv_command("JOIN").await;
    assert_eq!(join.params[0], "#general");

    let topic = client.recv_command("332").await;
    assert_eq!(topic.params[2], "house rules");
    client.recv_command("329").await;
    let names = client.recv_command("353").await;
    assert_eq!(names.params[3], "ada");
    client.recv_command("366").await;

    client.send("PRIVMSG #general :hello there").await;
    // delivery is asynchronous; poll the backend record
    for _ in 0..100 {
        if !server.world.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        server.world.sent(),
        vec![(GENERAL, "hello there".to_owned())]
    );
}

#[tokio::test]
async fn connections_with_one_account_share_a_session() {
    let server = TestServer::spawn().await;
    let mut first = TestClient::connect(server.addr).await;
    let mut second = TestClient::connect(server.addr).await;
    first.register(&guild_pass()).await;
    second.register(&guild_pass()).await;

    assert_eq!(server.registry.session_count(), 1);
    assert_eq!(server.world.dials(), 1);

    // both join, then a backend message reaches both
    for client in [&mut first, &mut second] {
        client.send("JOIN #general").await;
        client.recv_command("366").await;
    }

    server.world.push_event(Event::MessageCreate(ChatMessage {
        id: common::sf(900),
        channel_id: GENERAL,
        guild_id: Some(GUILD),
        author: User {
            id: common::sf(2),
            username: "bob".to_owned(),
        },
        member: None,
        content: "hi all".to_owned(),
    }));

    for client in [&mut first, &mut second] {
        let msg = client.recv_command("PRIVMSG").await;
        assert_eq!(msg.params, vec!["#general", "hi all"]);
        assert_eq!(msg.prefix.as_ref().map(|p| p.name()), Some("bob"));
    }
}

#[tokio::test]
async fn list_and_whois() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;
    client.register(&guild_pass()).await;

    client.send("LIST").await;
    client.recv_command("321").await;
    let first = client.recv_command("322").await;
    // listing follows backend position order
    assert_eq!(first.params[1], "#random");
    let second = client.recv_command("322").await;
    assert_eq!(second.params[1], "#general");
    assert_eq!(second.params[3], "house rules");
    client.recv_command("323").await;

    client.send("JOIN #general").await;
    client.recv_command("366").await;
    client.send("WHOIS bob").await;
    let whois = client.recv_command("311").await;
    assert_eq!(whois.params[1], "bob");
    client.recv_command("318").await;
}

#[tokio::test]
async fn quit_ends_with_an_error_line() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;
    client.register(&guild_pass()).await;
    client.send("QUIT :bye").await;
    client.recv_command("ERROR").await;
}

#[tokio::test]
async fn bad_token_is_fatal() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;
    client.send("PASS wrong").await;
    client.send("NICK ada").await;
    client.send("USER ada 0 * :Ada L").await;
    client.recv_command("ERROR").await;
    assert_eq!(server.registry.session_count(), 0);
}

#[tokio::test]
async fn disconnect_releases_the_session() {
    let server = TestServer::spawn().await;
    let mut client = TestClient::connect(server.addr).await;
    client.register(&guild_pass()).await;
    assert_eq!(server.registry.session_count(), 1);

    client.send("QUIT :bye").await;
    client.recv_command("ERROR").await;
    drop(client);

    for _ in 0..100 {
        if server.registry.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.registry.session_count(), 0);
}
