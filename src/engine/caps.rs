//! CAP subcommand handling.
//!
//! LS and REQ before registration hold the handshake open until the
//! client sends END. REQ is all-or-nothing: one unknown capability NAKs
//! the entire request and changes nothing.

use snowgate_proto::Message;

use super::{replies, supported_caps_string, Backend, Engine, SUPPORTED_CAPS};
use crate::error::EngineError;

impl<B: Backend> Engine<B> {
    pub(super) async fn handle_cap(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, None)?;
        match msg.params[0].to_ascii_uppercase().as_str() {
            "LS" => self.handle_cap_ls(msg),
            "LIST" => self.handle_cap_list(msg),
            "REQ" => self.handle_cap_req(msg),
            "END" => self.handle_cap_end(msg).await,
            other => {
                let nick = self.display_nick().to_owned();
                self.send(
                    Message::new(
                        "410",
                        vec![
                            nick,
                            other.to_owned(),
                            "Invalid CAP command".to_owned(),
                        ],
                    )
                    .with_prefix(self.server_prefix.clone()),
                )
            }
        }
    }

    fn handle_cap_ls(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(2))?;
        self.send(replies::cap_ls(
            &self.server_prefix,
            self.display_nick(),
            &supported_caps_string(),
        ))?;
        if !self.registered {
            self.cap_blocked = true;
        }
        Ok(())
    }

    fn handle_cap_list(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(2))?;
        let mut enabled: Vec<&str> = self.caps.iter().map(String::as_str).collect();
        enabled.sort_unstable();
        self.send(replies::cap_list(
            &self.server_prefix,
            self.display_nick(),
            &enabled.join(" "),
        ))
    }

    fn handle_cap_req(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 2, Some(2))?;
        let requested: Vec<&str> = msg.params[1].split_whitespace().collect();

        let all_known = requested.iter().all(|cap| {
            let name = cap.strip_prefix('-').unwrap_or(cap);
            SUPPORTED_CAPS.iter().any(|(supported, _)| *supported == name)
        });
        if requested.is_empty() || !all_known {
            return self.send(replies::cap_nak(
                &self.server_prefix,
                self.display_nick(),
                &msg.params[1],
            ));
        }

        for cap in &requested {
            match cap.strip_prefix('-') {
                Some(name) => {
                    self.caps.remove(name);
                }
                None => {
                    self.caps.insert((*cap).to_owned());
                }
            }
        }
        self.send(replies::cap_ack(
            &self.server_prefix,
            self.display_nick(),
            &msg.params[1],
        ))?;
        if !self.registered {
            self.cap_blocked = true;
        }
        Ok(())
    }

    async fn handle_cap_end(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        self.cap_blocked = false;
        self.maybe_complete_registration().await
    }
}
