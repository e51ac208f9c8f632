//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the relay configuration and the only two pieces of global
//! mutable state: the session registry and the stroke store. Both are
//! internally synchronized and cheap to clone.
//!
//! `stroke_order` serializes stroke traffic against replay snapshots. A
//! stroke mutation holds it until its fan-out has been enqueued; taking a
//! joiner's replay holds it while the snapshot is built and the joiner is
//! marked synced. Always acquire it before the registry or store locks.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::services::registry::SessionRegistry;
use crate::services::strokes::StrokeStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub sessions: SessionRegistry,
    pub strokes: StrokeStore,
    pub stroke_order: Arc<Mutex<()>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let strokes = StrokeStore::new(config.strokes);
        Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            strokes,
            stroke_order: Arc::new(Mutex::new(())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use axum::extract::ws::Utf8Bytes;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    use crate::frame::ServerMessage;
    use crate::services::registry::SessionId;

    /// Create a test `AppState` with default tunables.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(RelayConfig::default())
    }

    /// Create a test `AppState` with a custom config.
    #[must_use]
    pub fn test_app_state_with(config: RelayConfig) -> AppState {
        AppState::new(config)
    }

    /// Register a session directly in the registry (no count broadcast, no
    /// replay) and return its id with the receiving end of its queue.
    pub async fn seed_session(state: &AppState) -> (SessionId, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(state.config.outbound_buffer);
        let id = state.sessions.admit(tx, None).await;
        (id, rx)
    }

    /// Receive and decode the next queued frame, failing after 500ms.
    pub async fn recv_frame(rx: &mut mpsc::Receiver<Utf8Bytes>) -> ServerMessage {
        let payload = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("outbound channel closed unexpectedly");
        serde_json::from_str(&payload).expect("outbound frame should be a valid server message")
    }

    /// Receive the next queued frame as raw JSON.
    pub async fn recv_json(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Value {
        let payload = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("outbound channel closed unexpectedly");
        serde_json::from_str(&payload).expect("outbound frame should be valid json")
    }

    /// Assert nothing arrives on the queue for a short window.
    pub async fn assert_no_frame(rx: &mut mpsc::Receiver<Utf8Bytes>) {
        if let Ok(Some(payload)) = timeout(Duration::from_millis(80), rx.recv()).await {
            panic!("expected no frame, got {}", payload.as_str());
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
