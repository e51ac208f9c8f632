//! Session replay — bring a late joiner up to date on current strokes.
//!
//! DESIGN
//! ======
//! Each stored stroke is rendered as the same frames a live observer would
//! have seen: one `line_start` tagged `isReplay`, then one `line_update` per
//! remaining point in order. Strokes already ended but still inside their
//! grace delay are followed by their original `line_end` so the joiner fades
//! them out in step with everyone else. Only strokes whose owner is still
//! registered are replayed, and never the joiner's own.
//!
//! A joiner is admitted awaiting replay, so live stroke frames skip it.
//! [`take_replay`] builds the snapshot and lets live stroke traffic through
//! under `AppState::stroke_order`, the lock every stroke mutation holds
//! until its fan-out is enqueued. A point therefore reaches the joiner
//! exactly once: in the snapshot if it was appended before, live if after.
//!
//! The frames are returned to the connection task, which writes them to
//! the socket ahead of anything waiting in the outbound queue. A large
//! replay never occupies queue capacity, so live traffic cannot overflow
//! the queue behind it.

use tracing::{debug, info};

use crate::frame::ServerMessage;
use crate::services::registry::SessionId;
use crate::services::strokes::Stroke;
use crate::state::AppState;

/// Frames that bring one joiner up to date.
#[derive(Debug, Default)]
pub struct Replay {
    pub frames: Vec<ServerMessage>,
    /// Number of strokes the frames cover.
    pub strokes: usize,
}

/// Build the joiner's replay and mark it synced, atomically with respect to
/// live stroke traffic. A session that already left gets an empty replay.
pub async fn take_replay(state: &AppState, session_id: &SessionId) -> Replay {
    let _order = state.stroke_order.lock().await;

    if !state.sessions.mark_synced(session_id).await {
        debug!(%session_id, "replay: session gone before replay");
        return Replay::default();
    }

    let live = state.sessions.ids().await;
    let snapshot = state.strokes.snapshot().await;

    let mut replay = Replay::default();
    for stroke in snapshot
        .iter()
        .filter(|s| &s.owner != session_id && live.contains(&s.owner))
    {
        replay_stroke(stroke, &mut replay.frames);
        replay.strokes += 1;
    }

    if replay.strokes > 0 {
        info!(%session_id, strokes = replay.strokes, frames = replay.frames.len(), "replay: stroke snapshot taken");
    }
    replay
}

fn replay_stroke(stroke: &Stroke, frames: &mut Vec<ServerMessage>) {
    let mut points = stroke.points.iter();
    let Some(first) = points.next() else {
        return;
    };

    frames.push(ServerMessage::LineStart {
        line_id: stroke.line_id.clone(),
        point: first.clone(),
        user_color: stroke.color.clone(),
        user_id: stroke.owner.clone(),
        platform: stroke.platform.clone(),
        is_replay: Some(true),
    });
    frames.extend(
        points.map(|point| ServerMessage::LineUpdate { line_id: stroke.line_id.clone(), point: point.clone() }),
    );
    if let Some(end_time) = stroke.end_time {
        frames.push(ServerMessage::LineEnd { line_id: stroke.line_id.clone(), end_time });
    }
}

#[cfg(test)]
#[path = "replay_test.rs"]
mod tests;
