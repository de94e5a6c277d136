//! Session Registry
//!
//! Process-wide map from client connection to its single live session.
//! Session tasks never touch the registry; a session that ends on its own is
//! removed by the owning client's loop through [`SessionRegistry::remove_if`].
//!
//! Changes for one client run under that client's gate, so a teardown and
//! the install that follows it are never interleaved with another change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::events::CloseReason;
use crate::session::{Session, SessionHandle, SessionRef};

/// Identity of one client WebSocket connection.
pub type ClientId = Uuid;

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ClientId, SessionHandle>>,
    gates: Mutex<HashMap<ClientId, Arc<Mutex<()>>>>,
    teardown_timeout: Duration,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(teardown_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            teardown_timeout,
        }
    }

    /// Install `session` for `client_id` and start it.
    ///
    /// Any prior session for the client is torn down and awaited first, so
    /// two shells for one client never overlap, even when calls race.
    pub async fn put(&self, client_id: ClientId, session: Session) -> SessionRef {
        let gate = self.gate(client_id).await;

        let prior = self.sessions.lock().await.remove(&client_id);
        if let Some(prior) = prior {
            self.supersede(client_id, prior).await;
        }

        let handle = session.start();
        let session = handle.session().clone();
        let displaced = self.sessions.lock().await.insert(client_id, handle);
        if let Some(displaced) = displaced {
            self.supersede(client_id, displaced).await;
        }

        self.release(client_id, gate).await;
        session
    }

    async fn supersede(&self, client_id: ClientId, mut handle: SessionHandle) {
        debug!(client_id = %client_id, session_id = %handle.id(), "Superseding session");
        handle
            .shutdown(CloseReason::Superseded, self.teardown_timeout)
            .await;
    }

    /// Exclusive access to one client's entry.
    async fn gate(&self, client_id: ClientId) -> OwnedMutexGuard<()> {
        let gate = self
            .gates
            .lock()
            .await
            .entry(client_id)
            .or_default()
            .clone();
        gate.lock_owned().await
    }

    /// Drop the gate, forgetting it once nobody else is waiting on it.
    async fn release(&self, client_id: ClientId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut gates = self.gates.lock().await;
        if gates
            .get(&client_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&client_id);
        }
    }

    /// Routing view of the client's session.
    pub async fn get(&self, client_id: ClientId) -> Option<SessionRef> {
        self.sessions
            .lock()
            .await
            .get(&client_id)
            .map(|handle| handle.session().clone())
    }

    /// Tear down and forget the client's session. Returns whether one existed.
    pub async fn remove(&self, client_id: ClientId, reason: CloseReason) -> bool {
        let gate = self.gate(client_id).await;
        let handle = self.sessions.lock().await.remove(&client_id);
        let existed = match handle {
            Some(mut handle) => {
                handle.shutdown(reason, self.teardown_timeout).await;
                true
            }
            None => false,
        };
        self.release(client_id, gate).await;
        existed
    }

    /// Forget the client's session only if it is still `session_id`.
    pub async fn remove_if(&self, client_id: ClientId, session_id: &str) -> bool {
        let gate = self.gate(client_id).await;
        let handle = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&client_id) {
                Some(handle) if handle.id() == session_id => sessions.remove(&client_id),
                _ => None,
            }
        };
        let removed = match handle {
            Some(mut handle) => {
                // Already ended; this only reaps the task
                handle
                    .shutdown(CloseReason::RemoteClosed, self.teardown_timeout)
                    .await;
                true
            }
            None => false,
        };
        self.release(client_id, gate).await;
        removed
    }

    /// Tear down every session, e.g. on process shutdown.
    pub async fn shutdown_all(&self, reason: CloseReason) -> usize {
        let handles: Vec<_> = self.sessions.lock().await.drain().collect();
        let count = handles.len();
        let teardowns = handles.into_iter().map(|(client_id, mut handle)| async move {
            debug!(client_id = %client_id, session_id = %handle.id(), "Closing session");
            handle.shutdown(reason, self.teardown_timeout).await;
        });
        futures::future::join_all(teardowns).await;
        count
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
