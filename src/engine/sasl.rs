//! SASL PLAIN negotiation.
//!
//! The client's payload arrives base64-encoded in fragments of at most
//! 400 bytes; a fragment of exactly 400 bytes means more follow, and `+`
//! stands for the empty final fragment. While a payload is partially
//! received the registration FSM is held open.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use snowgate_proto::Message;

use super::{replies, Backend, Engine, SaslCredentials};
use crate::error::EngineError;

impl<B: Backend> Engine<B> {
    pub(super) async fn handle_authenticate(&mut self, msg: &Message) -> Result<(), EngineError> {
        self.expect_params(msg, 1, Some(1))?;
        if self.registered {
            return Err(EngineError::AlreadyRegistered);
        }

        let arg = msg.params[0].as_str();

        if arg == "PLAIN" && self.sasl_buf.is_empty() && !self.sasl_blocked {
            return self.send(replies::authenticate_continue());
        }

        if arg == "*" {
            self.sasl_buf.clear();
            self.sasl_blocked = false;
            return Err(EngineError::SaslFail("aborted by client".to_owned()));
        }

        let fragment = if arg == "+" { "" } else { arg };
        self.sasl_buf.extend_from_slice(fragment.as_bytes());
        self.sasl_blocked = true;
        if fragment.len() == 400 {
            // more fragments follow
            return Ok(());
        }
        self.sasl_blocked = false;

        let payload = String::from_utf8(std::mem::take(&mut self.sasl_buf))
            .map_err(|_| EngineError::SaslFail("payload is not valid base64".to_owned()))?;
        let decoded = STANDARD_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| EngineError::SaslFail("payload is not valid base64".to_owned()))?;

        let fields: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
        let [authzid, authcid, password] = fields.as_slice() else {
            return Err(EngineError::SaslFail(
                "expected authzid, authcid, and password".to_owned(),
            ));
        };
        let field = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| EngineError::SaslFail("field is not valid UTF-8".to_owned()))
        };
        let credentials = SaslCredentials {
            authzid: field(authzid)?,
            authcid: field(authcid)?,
            password: field(password)?,
        };

        let nick = self.display_nick().to_owned();
        self.send(replies::logged_in(
            &self.server_prefix,
            &nick,
            &self.client_prefix,
            &credentials.authcid,
        ))?;
        self.send(replies::sasl_success(&self.server_prefix, &nick))?;
        self.sasl = Some(credentials);

        self.maybe_complete_registration().await
    }
}
