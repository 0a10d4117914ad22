//! Registration-time and registered command handlers.

use chrono::{DateTime, Utc};
use snowgate_proto::{parse_server_time, Message};

use super::{replies, Backend, Engine, HistoryMessage};
use crate::backend::Snowflake;
use crate::error::EngineError;

/// A CHATHISTORY message selector: a point in time or "from the newest".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Anchor {
    Time(DateTime<Utc>),
    Wildcard,
}

impl Anchor {
    fn time(self) -> DateTime<Utc> {
        match self {
            Anchor::Time(t) => t,
            Anchor::Wildcard => Utc::now(),
        }
    }
}

fn history_fail(subcommand: &str, reason: impl Into<String>) -> EngineError {
    EngineError::HistoryFail {
        subcommand: subcommand.to_owned(),
        reason: reason.into(),
    }
}

fn parse_anchor(s: &str, subcommand: &str) -> Result<Anchor, EngineError> {
    if let Some(ts) = s.strip_prefix("timestamp=") {
        parse_server_time(ts)
            .map(Anchor::Time)
            .ok_or_else(|| history_fail(subcommand, format!("bad timestamp {}", ts)))
    } else if let Some(id) = s.strip_prefix("msgid=") {
        // Message ids are snowflakes, which carry their creation time.
        id.parse::<Snowflake>()
            .map(|id| Anchor::Time(id.timestamp()))
            .map_err(|_| history_fail(subcommand, format!("bad msgid {}", id)))
    } else if s == "*" {
        Ok(Anchor::Wildcard)
    } else {
        Err(history_fail(
            subcommand,
            format!("unknown selector {}", s),
        ))
    }
}

fn parse_limit(s: &str, subcommand: &str) -> Result<usize, EngineError> {
    s.parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| history_fail(subcommand, format!("bad limit {}", s)))
}

impl<B: Backend> Engine<B> {
    pub(super) async fn handle_pass(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        if self.registered {
            return Err(EngineError::AlreadyRegistered);
        }
        self.password = self.backend.handle_password(&msg.params[0]).await?;
        self.maybe_complete_registration().await
    }

    pub(super) async fn handle_nick(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        if self.registered {
            // renames are backend-driven; a client NICK is ignored
            return Ok(());
        }
        self.nickname = self.backend.handle_nickname(&msg.params[0]).await?;
        self.maybe_complete_registration().await
    }

    pub(super) async fn handle_user(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 4, Some(4))?;
        if self.registered {
            return Err(EngineError::AlreadyRegistered);
        }
        self.username = self.backend.handle_username(&msg.params[0]).await?;
        self.realname = self.backend.handle_realname(&msg.params[3]).await?;
        self.maybe_complete_registration().await
    }

    pub(super) async fn handle_ping(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        let nonce = self.backend.handle_ping(&msg.params[0]).await?;
        self.send(replies::pong(&self.server_prefix, &nonce))
    }

    pub(super) async fn handle_join(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        let targets = msg.params[0].clone();
        for channel in targets.split(',') {
            if self.channels.contains(channel) {
                continue;
            }
            self.backend.handle_join(channel).await?;

            self.send(replies::join(&self.client_prefix, channel))?;
            self.channels.insert(channel.to_owned());
            let nick = self.client_prefix.name().to_owned();

            let topic = self.backend.handle_topic(channel).await?;
            if topic.is_empty() {
                self.send(replies::no_topic(&self.server_prefix, &nick, channel))?;
            } else {
                self.send(replies::topic(&self.server_prefix, &nick, channel, &topic))?;
            }

            if let Some(created) = self.backend.handle_creation_time(channel).await? {
                self.send(replies::creation_time(
                    &self.server_prefix,
                    &nick,
                    channel,
                    created,
                ))?;
            }

            for name in self.backend.handle_names(channel).await? {
                self.send(replies::nam_reply(&self.server_prefix, &nick, channel, &name))?;
            }
            self.send(replies::end_of_names(&self.server_prefix, &nick, channel))?;
        }
        Ok(())
    }

    pub(super) async fn handle_privmsg(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 2, Some(2))?;
        self.backend
            .handle_message(&msg.params[0], &msg.params[1])
            .await?;
        Ok(())
    }

    pub(super) async fn handle_list(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 0, Some(2))?;
        let entries = self.backend.handle_list().await?;
        let nick = self.client_prefix.name().to_owned();
        self.send(replies::list_start(&self.server_prefix, &nick))?;
        for entry in &entries {
            self.send(replies::list_entry(&self.server_prefix, &nick, entry))?;
        }
        self.send(replies::list_end(&self.server_prefix, &nick))
    }

    pub(super) async fn handle_whois(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        let info = self.backend.handle_whois(&msg.params[0]).await?;
        let nick = self.client_prefix.name().to_owned();
        let target = info.prefix.name().to_owned();

        self.send(replies::whois_user(
            &self.server_prefix,
            &nick,
            &info.prefix,
            &info.realname,
        ))?;
        if !info.server.is_empty() || !info.server_info.is_empty() {
            self.send(replies::whois_server(
                &self.server_prefix,
                &nick,
                &target,
                &info.server,
                &info.server_info,
            ))?;
        }
        if info.is_operator {
            self.send(replies::whois_operator(&self.server_prefix, &nick, &target))?;
        }
        if let Some(last_active) = info.last_active {
            let idle = (Utc::now() - last_active).num_seconds().max(0);
            self.send(replies::whois_idle(&self.server_prefix, &nick, &target, idle))?;
        }
        self.send(replies::whois_channels(
            &self.server_prefix,
            &nick,
            &target,
            &info.channels,
        ))?;
        self.send(replies::end_of_whois(&self.server_prefix, &nick, &target))
    }

    pub(super) async fn handle_chathistory(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 4, Some(5))?;
        let subcommand = msg.params[0].to_ascii_uppercase();
        let target = msg.params[1].clone();
        if target == "*" {
            return Err(history_fail(&subcommand, "target * is not supported"));
        }
        let anchor = parse_anchor(&msg.params[2], &subcommand)?;

        let messages: Vec<HistoryMessage> = match subcommand.as_str() {
            "BEFORE" => {
                let limit = parse_limit(&msg.params[3], &subcommand)?;
                self.backend
                    .handle_history_before(&target, anchor.time(), limit)
                    .await?
            }
            "AFTER" => {
                let limit = parse_limit(&msg.params[3], &subcommand)?;
                self.backend
                    .handle_history_after(&target, anchor.time(), limit)
                    .await?
            }
            "AROUND" => {
                let limit = parse_limit(&msg.params[3], &subcommand)?;
                self.backend
                    .handle_history_around(&target, anchor.time(), limit)
                    .await?
            }
            "LATEST" => {
                let limit = parse_limit(&msg.params[3], &subcommand)?;
                match anchor {
                    Anchor::Wildcard => {
                        self.backend.handle_history_latest(&target, limit).await?
                    }
                    Anchor::Time(t) => {
                        self.backend.handle_history_after(&target, t, limit).await?
                    }
                }
            }
            "BETWEEN" => {
                self.expect_params(msg, 5, Some(5))?;
                let to = parse_anchor(&msg.params[3], &subcommand)?;
                let limit = parse_limit(&msg.params[4], &subcommand)?;
                self.backend
                    .handle_history_between(&target, anchor.time(), to.time(), limit)
                    .await?
            }
            _ => return Err(history_fail(&subcommand, "unknown subcommand")),
        };

        let batch = self.next_batch();
        self.send(replies::batch_start(
            &self.server_prefix,
            &batch,
            "chathistory",
            &target,
        ))?;
        for message in &messages {
            self.push_message_batched(message, Some(&batch))?;
        }
        self.send(replies::batch_end(&self.server_prefix, &batch))
    }

    pub(super) async fn handle_tagmsg(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        let target = msg.params[0].clone();
        match msg.tag_value("+typing") {
            Some("active") => self.backend.handle_typing_active(&target).await?,
            Some("paused") => self.backend.handle_typing_paused(&target).await?,
            Some("done") => self.backend.handle_typing_done(&target).await?,
            _ => {}
        }
        Ok(())
    }
}
