use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Outbox;
use crate::protocol;

/// Process-unique identifier of one connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected client that has chosen a username.
///
/// Cloning is cheap: the registry keeps a clone for lookup and fan-out while
/// the connection handler keeps the original.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    username: String,
    peer: SocketAddr,
    outbox: Outbox,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(username: String, peer: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id: SessionId::next(),
            username,
            peer,
            outbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue an already-terminated line for this session.
    pub fn send(&self, data: Bytes) -> bool {
        self.outbox.deliver(data)
    }
}

/// Lifecycle events emitted by the registry.
///
/// Each event is sent while the registry lock is still held, after the
/// matching notice has been queued for every recipient. The server's
/// activity log consumes them; tests use them to wait for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Joined { id: SessionId, username: String },
    Left { id: SessionId, username: String },
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    // Latest registration wins when usernames collide.
    by_name: HashMap<String, SessionId>,
}

impl RegistryInner {
    fn insert(&mut self, session: Session) {
        self.by_name.insert(session.username.clone(), session.id);
        self.sessions.insert(session.id, session);
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&id)?;
        if self.by_name.get(&removed.username) == Some(&id) {
            self.by_name.remove(&removed.username);
        }
        Some(removed)
    }

    fn fan_out(&self, line: &[u8], exclude: Option<SessionId>) -> usize {
        let data = protocol::terminate(line);
        let mut delivered = 0;
        for session in self.sessions.values() {
            if Some(session.id) == exclude {
                continue;
            }
            if session.send(data.clone()) {
                delivered += 1;
            } else {
                tracing::debug!(
                    session = %session.id,
                    username = %session.username,
                    "recipient gone, skipping"
                );
            }
        }
        delivered
    }
}

/// Shared set of active sessions.
///
/// Clone is cheap and every clone sees the same state. One mutex covers
/// insertion, removal and broadcast iteration, so a broadcast observes every
/// join or leave that finished before it started and none that started after.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            events_tx,
        }
    }

    /// Subscribe to join/leave events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Register a session and point its username at it.
    pub fn add(&self, session: Session) {
        let mut inner = self.inner.lock();
        let event = SessionEvent::Joined {
            id: session.id,
            username: session.username.clone(),
        };
        inner.insert(session);
        let _ = self.events_tx.send(event);
    }

    /// Unregister a session, returning it if it was present.
    ///
    /// The username mapping is erased only if it still refers to this
    /// session; a later session that reused the name keeps it.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let removed = inner.remove(id);
        if let Some(ref session) = removed {
            let _ = self.events_tx.send(SessionEvent::Left {
                id,
                username: session.username.clone(),
            });
        }
        removed
    }

    /// Register `session` and announce it to everyone already present.
    ///
    /// Returns the number of sessions that received the join notice.
    pub fn join(&self, session: Session) -> usize {
        let mut inner = self.inner.lock();
        let id = session.id;
        let username = session.username.clone();
        inner.insert(session);
        let delivered = inner.fan_out(&protocol::join_notice(&username), Some(id));
        let _ = self.events_tx.send(SessionEvent::Joined { id, username });
        delivered
    }

    /// Unregister a session and announce its departure to everyone left.
    pub fn leave(&self, id: SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let removed = inner.remove(id)?;
        inner.fan_out(&protocol::leave_notice(&removed.username), None);
        let _ = self.events_tx.send(SessionEvent::Left {
            id,
            username: removed.username.clone(),
        });
        Some(removed)
    }

    /// Send `line` plus a newline to every session except `exclude`.
    ///
    /// A recipient whose connection is already gone is skipped without
    /// affecting the others. Returns how many sessions accepted the line.
    pub fn broadcast(&self, line: &[u8], exclude: Option<SessionId>) -> usize {
        self.inner.lock().fan_out(line, exclude)
    }

    /// Copy of the active set, in no particular order.
    pub fn snapshot(&self) -> Vec<Session> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Look up the session currently holding `username`.
    pub fn lookup(&self, username: &str) -> Option<Session> {
        let inner = self.inner.lock();
        let id = inner.by_name.get(username)?;
        inner.sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Log every join and departure with the current head count until
    /// `cancel` fires. Resolves to the number of events logged.
    ///
    /// Subscribes before returning, so nothing registered after this call
    /// is missed.
    pub fn spawn_activity_log(&self, cancel: CancellationToken) -> JoinHandle<u64> {
        let mut events = self.subscribe_events();
        let registry = self.clone();
        tokio::spawn(async move {
            let mut logged = 0;
            loop {
                // Buffered events are logged before cancellation is seen.
                let event = tokio::select! {
                    biased;
                    event = events.recv() => event,
                    _ = cancel.cancelled() => break,
                };
                match event {
                    Ok(SessionEvent::Joined { id, username }) => {
                        tracing::info!(session = %id, online = registry.len(), "{} has joined the chat", username);
                    }
                    Ok(SessionEvent::Left { id, username }) => {
                        tracing::info!(session = %id, online = registry.len(), "{} has left the chat", username);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "activity log fell behind");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                logged += 1;
            }
            logged
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
