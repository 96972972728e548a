//! Session-scoped progress pub/sub.
//!
//! Observers hold a connection-level [`Subscriber`] and join one or more
//! sessions with it. Events published for a session reach only the
//! subscribers registered under that session at publish time. Terminal
//! events close the session: its record is dropped after delivery and
//! later subscription attempts are refused.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::events::ProgressEvent;

/// Terminated sessions remembered for refusing late subscribers.
const CLOSED_SESSION_MEMORY: usize = 1024;

/// Opaque identifier of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Connection-level handle. Cloning shares the same identity.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl Subscriber {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// `false` once the receiving side has gone away.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("session {0} has already finished")]
    SessionClosed(SessionId),
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, HashMap<SubscriberId, mpsc::UnboundedSender<ProgressEvent>>>,
    closed: VecDeque<SessionId>,
    closed_lookup: HashSet<SessionId>,
}

impl Registry {
    fn close(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        if !self.closed_lookup.insert(session) {
            return;
        }
        self.closed.push_back(session);
        if self.closed.len() > CLOSED_SESSION_MEMORY {
            if let Some(oldest) = self.closed.pop_front() {
                self.closed_lookup.remove(&oldest);
            }
        }
    }
}

/// Registry of sessions and their subscribers.
///
/// Constructed once by the composition root and shared by reference
/// (usually behind an `Arc`) with the coordinator and the transport.
#[derive(Default)]
pub struct ProgressBroadcaster {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl ProgressBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Registry mutations cannot leave it half-updated, so a poisoned
        // lock is still usable.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new handle and the receiver its events arrive on.
    pub fn connect(&self) -> (Subscriber, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        (Subscriber { id, sender }, receiver)
    }

    /// Register `subscriber` under `session`, creating the session on demand.
    pub fn subscribe(&self, session: SessionId, subscriber: &Subscriber) -> Result<(), SubscribeError> {
        let mut registry = self.lock();
        if registry.closed_lookup.contains(&session) {
            return Err(SubscribeError::SessionClosed(session));
        }
        registry
            .sessions
            .entry(session)
            .or_default()
            .insert(subscriber.id, subscriber.sender.clone());
        debug!("Subscriber {:?} joined session {}", subscriber.id, session);
        Ok(())
    }

    /// Deliver `event` to every subscriber of its session.
    ///
    /// Returns the number of subscribers reached. Disconnected handles are
    /// pruned silently. A terminal event closes the session.
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let session = event.session_id;
        let mut registry = self.lock();

        let mut delivered = 0;
        if let Some(subscribers) = registry.sessions.get_mut(&session) {
            subscribers.retain(|_, sender| {
                let ok = sender.send(event.clone()).is_ok();
                delivered += usize::from(ok);
                ok
            });
            if subscribers.is_empty() {
                registry.sessions.remove(&session);
            }
        }

        if event.is_terminal() {
            registry.close(session);
            debug!("Session {} closed after {}", session, event.step);
        }

        delivered
    }

    /// Remove `subscriber` from every session, dropping sessions left empty.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        let mut registry = self.lock();
        registry.sessions.retain(|_, subscribers| {
            subscribers.remove(&subscriber.id);
            !subscribers.is_empty()
        });
    }

    /// Number of live session records.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, session: SessionId) -> usize {
        self.lock().sessions.get(&session).map_or(0, HashMap::len)
    }

    /// `true` once a terminal event has been published for `session`.
    #[must_use]
    pub fn is_closed(&self, session: SessionId) -> bool {
        self.lock().closed_lookup.contains(&session)
    }
}
