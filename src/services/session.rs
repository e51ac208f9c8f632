//! Session lifecycle — admission and teardown of a connection.
//!
//! DESIGN
//! ======
//! These two functions are the only places that touch both the registry
//! and the stroke store for one session:
//! - `connect`: admit awaiting replay → broadcast `user_count`
//! - `disconnect`: remove → drop owned strokes → broadcast `user_count`
//!
//! The replay itself is taken by the connection task once the replay delay
//! has passed (see `services::replay`).
//!
//! `disconnect` runs its cascade only for the call that actually removed the
//! session, so it is safe to call more than once.

use std::net::SocketAddr;

use tracing::info;

use crate::services::broadcast::broadcast_user_count;
use crate::services::registry::{Outbound, SessionId};
use crate::state::AppState;

/// Admit a connection. It takes presence traffic right away and stroke
/// traffic once its replay has been taken.
pub async fn connect(state: &AppState, outbound: Outbound, remote_addr: Option<SocketAddr>) -> SessionId {
    let session_id = state.sessions.admit_awaiting_replay(outbound, remote_addr).await;
    broadcast_user_count(state).await;
    session_id
}

/// Tear down a session. Returns false if it was already gone.
pub async fn disconnect(state: &AppState, session_id: &SessionId) -> bool {
    let Some(session) = state.sessions.remove(session_id).await else {
        return false;
    };
    let strokes = state.strokes.remove_owned_by(session_id).await;
    let remaining = state.sessions.count().await;
    info!(
        %session_id,
        remote = ?session.remote_addr,
        connected_secs = session.joined_at.elapsed().as_secs(),
        strokes,
        remaining,
        "session: disconnected, owned strokes dropped"
    );
    broadcast_user_count(state).await;
    true
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
