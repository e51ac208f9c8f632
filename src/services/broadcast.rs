//! Broadcast engine — fan-out of server messages to live sessions.
//!
//! DESIGN
//! ======
//! A message is serialized once and the payload clone is enqueued on each
//! recipient's outbound queue with `try_send`, so a slow peer never stalls
//! the sender's connection. The enqueue pass runs under the registry read
//! lock (see `SessionRegistry::fan_out`); it never awaits while holding it.
//!
//! ERROR HANDLING
//! ==============
//! A failed delivery (queue full or closed) is logged and the recipient is
//! evicted; the loop moves on to the next recipient. Eviction closes the
//! recipient's queue so its connection task tears the session down. A
//! recipient therefore receives every frame in order or stops receiving
//! altogether; it never sees a stroke with points missing from the middle.
//! Failures never propagate back to the caller's connection.
//!
//! Stroke frames (`line_*`) skip sessions still waiting for their replay;
//! presence and taps reach everyone.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::frame::{self, ServerMessage};
use crate::services::registry::{Audience, FanOut, SessionId};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue closed")]
    Closed,
    #[error("outbound queue full")]
    Lagging,
}

/// Deliver to every live session except `exclude`. Returns the number of
/// sessions the message was queued for.
pub async fn broadcast_except(state: &AppState, msg: &ServerMessage, exclude: &SessionId) -> usize {
    broadcast(state, msg, Some(exclude)).await
}

/// Deliver to every live session, sender included.
pub async fn broadcast_all(state: &AppState, msg: &ServerMessage) -> usize {
    broadcast(state, msg, None).await
}

async fn broadcast(state: &AppState, msg: &ServerMessage, exclude: Option<&SessionId>) -> usize {
    let payload = match frame::encode(msg) {
        Ok(p) => p,
        Err(e) => {
            warn!(kind = msg.kind(), error = %e, "broadcast: failed to encode message");
            return 0;
        }
    };
    let audience = if msg.is_stroke_traffic() { Audience::Synced } else { Audience::All };
    let fan_out = state.sessions.fan_out(exclude, audience, |_| Some(payload)).await;
    settle(state, msg.kind(), fan_out).await
}

/// Log and evict failed recipients, return the delivered count.
async fn settle(state: &AppState, kind: &'static str, fan_out: FanOut) -> usize {
    for (session_id, err) in fan_out.failed {
        let e = DeliveryError::from(err);
        warn!(%session_id, kind, error = %e, "broadcast: delivery failed, evicting session");
        state.sessions.evict(&session_id).await;
    }
    debug!(kind, delivered = fan_out.delivered, "broadcast: fan-out complete");
    fan_out.delivered
}

impl<T> From<TrySendError<T>> for DeliveryError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::Lagging,
            TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Broadcast the current session count to everyone. The count is read
/// under the same registry lock the deliveries run under, so the last
/// count every client receives is the count at quiescence.
pub async fn broadcast_user_count(state: &AppState) -> usize {
    let mut observed = 0;
    let fan_out = state
        .sessions
        .fan_out(None, Audience::All, |count| {
            observed = count;
            match frame::encode(&ServerMessage::UserCount { count }) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "broadcast: failed to encode user_count");
                    None
                }
            }
        })
        .await;
    info!(count = observed, "users online");
    settle(state, "user_count", fan_out).await
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
