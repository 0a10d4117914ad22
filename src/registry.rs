//! Session deduplication across logins.
//!
//! Differently phrased logins can resolve to the same backend account,
//! so sessions are keyed by the account id the backend reports, with a
//! token cache in front to skip redundant dials. All reference-count
//! transitions happen under the registry lock; the session itself only
//! stores the counter.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{BackendError, Connector, Snowflake};
use crate::render::Render;
use crate::session::{RemoveFn, Session};

pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn Render>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Token to account id, populated on first successful dial.
    tokens: HashMap<String, Snowflake>,
    sessions: HashMap<Snowflake, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, renderer: Arc<dyn Render>) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry {
            connector,
            renderer,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Fetch or dial the session for `token`.
    ///
    /// The returned session carries one reference the caller owes back
    /// through [`Session::release`].
    pub async fn get_or_create(
        self: &Arc<Self>,
        token: &str,
    ) -> Result<Arc<Session>, BackendError> {
        if let Some(session) = self.cached(token) {
            return Ok(session);
        }

        // dial outside the lock; a racing login for the same account may
        // beat us to registration
        let mut client = self.connector.connect(token).await?;
        let user = client.account().id;

        let session = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.sessions.get(&user) {
                let existing = Arc::clone(existing);
                existing.retain();
                inner.tokens.insert(token.to_owned(), user);
                drop(inner);
                // the duplicate connection loses
                tokio::spawn(async move { client.close().await });
                return Ok(existing);
            }

            let session = Session::spawn(client, Arc::clone(&self.renderer), self.remove_fn());
            session.retain();
            inner.tokens.insert(token.to_owned(), user);
            inner.sessions.insert(user, Arc::clone(&session));
            session
        };
        info!(%user, "session created");
        Ok(session)
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    fn cached(&self, token: &str) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        let user = inner.tokens.get(token)?;
        match inner.sessions.get(user) {
            Some(session) => {
                session.retain();
                Some(Arc::clone(session))
            }
            None => unreachable!("token entry without a session"),
        }
    }

    /// The last-reference decision for sessions owned by this registry.
    ///
    /// Runs under the registry lock so no new reference can be handed out
    /// between the decrement and the unregistration.
    fn remove_fn(self: &Arc<Self>) -> RemoveFn {
        let registry = Arc::downgrade(self);
        Box::new(move |session: &Session| {
            let Some(registry) = registry.upgrade() else {
                return session.release_ref();
            };
            let mut inner = registry.inner.lock();
            if !session.release_ref() {
                return false;
            }
            let user = session.user_id();
            if inner.sessions.remove(&user).is_none() {
                panic!("released a session the registry does not own");
            }
            inner.tokens.retain(|_, id| *id != user);
            debug!(%user, "session removed");
            true
        })
    }
}
