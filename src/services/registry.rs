//! Connection registry — live sessions keyed by session id.
//!
//! DESIGN
//! ======
//! Each admitted connection gets a fresh [`SessionId`] and an entry holding
//! the sender half of its outbound queue plus the profile announced by its
//! `user_join`. The registry owns the only long-lived clone of that sender:
//! dropping it (see [`SessionRegistry::evict`]) closes the queue, which ends
//! the connection task, which in turn removes the session.
//!
//! A session is "open" for delivery exactly while its sender is present.
//!
//! A connection admitted through [`SessionRegistry::admit_awaiting_replay`]
//! receives presence traffic right away but no stroke traffic until
//! [`SessionRegistry::mark_synced`] runs. The replay snapshot is taken in the
//! same critical section, so every stroke frame reaches the joiner exactly
//! once: either inside the snapshot or as live traffic after it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Sender half of a session's outbound queue. Payloads are pre-serialized.
pub type Outbound = mpsc::Sender<Utf8Bytes>;

// =============================================================================
// TYPES
// =============================================================================

/// Opaque, process-unique session identifier (`user_<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random id. v4 UUIDs make reuse within a process
    /// lifetime practically impossible.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("user_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user metadata announced by `user_join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    pub color: String,
    pub platform: String,
}

pub struct Session {
    pub id: SessionId,
    pub remote_addr: Option<SocketAddr>,
    /// `None` once evicted; the entry lingers until the connection task exits.
    outbound: Option<Outbound>,
    /// Populated lazily by the first `user_join`.
    pub profile: Option<Profile>,
    pub joined_at: Instant,
    /// Set until the session's stroke replay has been taken.
    awaiting_replay: bool,
}

impl Session {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn reached_by(&self, audience: Audience) -> bool {
        match audience {
            Audience::All => true,
            Audience::Synced => !self.awaiting_replay,
        }
    }
}

/// Which sessions a [`SessionRegistry::fan_out`] pass reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every open session.
    All,
    /// Open sessions whose stroke replay has been taken.
    Synced,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection that takes stroke traffic immediately.
    pub async fn admit(&self, outbound: Outbound, remote_addr: Option<SocketAddr>) -> SessionId {
        self.insert(outbound, remote_addr, false).await
    }

    /// Register a connection that waits for its stroke replay before it
    /// takes live stroke traffic.
    pub async fn admit_awaiting_replay(&self, outbound: Outbound, remote_addr: Option<SocketAddr>) -> SessionId {
        self.insert(outbound, remote_addr, true).await
    }

    async fn insert(&self, outbound: Outbound, remote_addr: Option<SocketAddr>, awaiting_replay: bool) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                remote_addr,
                outbound: Some(outbound),
                profile: None,
                joined_at: Instant::now(),
                awaiting_replay,
            },
        );
        info!(session_id = %id, remote = ?remote_addr, awaiting_replay, sessions = sessions.len(), "registry: session admitted");
        id
    }

    /// Replace the session's profile as a whole. Last write wins.
    /// Returns false if the session is gone.
    pub async fn set_profile(&self, id: &SessionId, profile: Profile) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        session.profile = Some(profile);
        true
    }

    pub async fn profile(&self, id: &SessionId) -> Option<Profile> {
        let sessions = self.sessions.read().await;
        sessions.get(id).and_then(|s| s.profile.clone())
    }

    /// Remove a session. Returns `None` if it was already removed, so
    /// callers can run cleanup exactly once.
    pub async fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id);
        if removed.is_some() {
            info!(session_id = %id, sessions = sessions.len(), "registry: session removed");
        }
        removed
    }

    /// Let stroke traffic through to a session admitted awaiting replay.
    /// Returns false if the session is gone.
    pub async fn mark_synced(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        session.awaiting_replay = false;
        true
    }

    /// Drop the session's outbound sender so its connection task winds down.
    /// The entry itself stays until [`Self::remove`].
    pub async fn evict(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(id)
            .and_then(|s| s.outbound.take())
            .is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Ids of every registered session, open or evicted.
    pub async fn ids(&self) -> HashSet<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Outbound sender for one open session.
    #[cfg(test)]
    pub async fn sender(&self, id: &SessionId) -> Option<Outbound> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|s| s.is_open())
            .and_then(|s| s.outbound.clone())
    }

    /// Enqueue one payload on every open session in `audience` except
    /// `exclude`.
    ///
    /// `payload` is built from the session count under the same read lock
    /// the deliveries run under, so a count snapshot reaches every queue
    /// before any admission or removal that would change it. Delivery uses
    /// `try_send` only; nothing here waits on a peer.
    pub async fn fan_out<F>(&self, exclude: Option<&SessionId>, audience: Audience, payload: F) -> FanOut
    where
        F: FnOnce(usize) -> Option<Utf8Bytes>,
    {
        let sessions = self.sessions.read().await;
        let mut out = FanOut::default();
        let Some(payload) = payload(sessions.len()) else {
            return out;
        };
        for session in sessions
            .values()
            .filter(|s| exclude != Some(&s.id) && s.reached_by(audience))
        {
            let Some(tx) = session.outbound.as_ref().filter(|tx| !tx.is_closed()) else {
                continue;
            };
            match tx.try_send(payload.clone()) {
                Ok(()) => out.delivered += 1,
                Err(TrySendError::Full(_)) => out.failed.push((session.id.clone(), TrySendError::Full(()))),
                Err(TrySendError::Closed(_)) => out.failed.push((session.id.clone(), TrySendError::Closed(()))),
            }
        }
        out
    }
}

/// Result of one [`SessionRegistry::fan_out`] pass.
#[derive(Debug, Default)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: Vec<(SessionId, TrySendError<()>)>,
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
