//! One client connection: line transport in, engine replies and session
//! events out.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use snowgate_proto::{LineCodec, Prefix};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::engine::{replies, Engine, HistoryMessage};
use crate::error::EngineError;
use crate::network::bridge::{user_prefix, SessionBackend};
use crate::network::gateway::Shared;
use crate::session::{ListenerGuard, SessionEvent};

async fn next_session_event(
    events: &mut Option<(mpsc::Receiver<SessionEvent>, ListenerGuard)>,
) -> Option<SessionEvent> {
    match events {
        Some((rx, _)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward one session event to the client.
fn deliver(engine: &mut Engine<SessionBackend>, event: SessionEvent) -> Result<(), EngineError> {
    let own_id = engine.backend().session().map(|s| s.user_id());
    match event {
        SessionEvent::Message(msg) => {
            if !engine.in_channel(&msg.channel) {
                return Ok(());
            }
            if own_id == Some(msg.author.id) && !engine.has_capability("echo-message") {
                return Ok(());
            }
            engine.push_message(&HistoryMessage {
                author: user_prefix(&msg.author),
                channel: msg.channel,
                content: msg.content,
                id: msg.id,
                date: msg.date,
            })
        }
        SessionEvent::Typing(typing) => {
            if !engine.in_channel(&typing.channel) || own_id == Some(typing.user.id) {
                return Ok(());
            }
            engine.push_typing(&user_prefix(&typing.user), &typing.channel, typing.date)
        }
        SessionEvent::NickChange(change) => {
            let old = Prefix::new(&change.old, "", &change.id.to_string());
            engine.push_nick_change(&old, &change.new)
        }
    }
}

/// Drive one client connection to completion.
pub(crate) async fn run<S>(stream: S, addr: SocketAddr, shared: Arc<Shared>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut lines) = framed.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let reply_tx = out_tx.clone();
    let backend = SessionBackend::new(Arc::clone(&shared.config), Arc::clone(&shared.registry));
    let mut engine = Engine::new(
        backend,
        out_tx,
        &shared.config.server.name,
        &addr.ip().to_string(),
    );
    let mut events: Option<(mpsc::Receiver<SessionEvent>, ListenerGuard)> = None;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            line = lines.next() => match line {
                None => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(msg)) => {
                    if msg.command == "QUIT" {
                        let _ = sink.send(replies::error("client quit")).await;
                        break Ok(());
                    }
                    let was_registered = engine.is_registered();
                    if let Err(e) = engine.handle(&msg).await {
                        if e.is_fatal() {
                            warn!(%addr, error = %e, "closing connection");
                            let _ = sink.send(replies::error(&e.to_string())).await;
                            break Ok(());
                        }
                        debug!(%addr, error = %e, "rejected client command");
                        if let Some(reply) =
                            e.to_irc_reply(engine.server_prefix(), engine.display_nick())
                        {
                            // through the outgoing queue, to keep ordering
                            // with engine replies
                            let _ = reply_tx.send(reply);
                        }
                    }
                    if !was_registered && engine.is_registered() {
                        let guild = engine.backend().guild();
                        if let Some(session) = engine.backend().session().cloned() {
                            events = Some(session.subscribe(guild));
                            if let Some(guild) = guild {
                                if engine.has_capability("message-tags") {
                                    if let Err(e) = session.typing_subscribe(guild).await {
                                        warn!(%addr, error = %e, "typing subscription failed");
                                    }
                                }
                            }
                        }
                    }
                }
            },
            out = out_rx.recv() => match out {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            event = next_session_event(&mut events) => match event {
                Some(event) => {
                    if let Err(e) = deliver(&mut engine, event) {
                        warn!(%addr, error = %e, "failed to deliver session event");
                        break Ok(());
                    }
                }
                None => {
                    // the session dropped us as a stalled listener
                    warn!(%addr, "event stream lagged, closing");
                    let _ = sink.send(replies::error("event stream lagged")).await;
                    break Ok(());
                }
            },
        }
    };

    drop(events);
    engine.backend_mut().detach().await;
    result
}
