//! WebSocket handler — per-connection loop and message router.
//!
//! DESIGN
//! ======
//! On upgrade, the connection is admitted as a session and enters a
//! `select!` loop:
//! - Incoming client frames → decode + dispatch by `type`
//! - Frames queued by broadcasts and replay → forward to client
//!
//! Handler functions are pure business logic: they validate, mutate the
//! stroke store or registry, and return an `Outcome`. The dispatch layer
//! owns all outbound concerns (reply to sender, broadcast to peers).
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → admit session awaiting replay → `user_count` to all
//! 2. Replay delay elapses → snapshot taken → replay frames written to the
//!    socket ahead of anything queued
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Dispatch applies Outcome (reply / broadcast)
//! 5. Close, transport error, or eviction → remove session → cascade strokes
//!    → `user_count` to all
//!
//! ORDERING
//! ========
//! A stroke mutation holds `AppState::stroke_order` from the store update
//! through the enqueue of its broadcast, so a joiner's replay snapshot sees
//! either both or neither.
//!
//! ERROR HANDLING
//! ==============
//! A bad frame is logged and dropped; the connection stays up. Mutations
//! of strokes the sender does not own are ignored without an error frame.

use std::net::SocketAddr;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{self, ClientMessage, Inbound, ServerMessage, now_ms};
use crate::services;
use crate::services::registry::{Profile, SessionId};
use crate::services::strokes::{StrokeKey, StrokeMeta};
use crate::state::AppState;

pub const DEFAULT_COLOR: &str = "#000000";
pub const DEFAULT_NAME: &str = "Anonymous";
pub const DEFAULT_PLATFORM: &str = "unknown";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// Deliver to every session except the sender.
    BroadcastExcludeSender(ServerMessage),
    /// Deliver to every session, sender included.
    BroadcastAll(ServerMessage),
    /// Send to the sender only.
    Reply(ServerMessage),
    /// Nothing goes out.
    Ignore,
}

// =============================================================================
// CONNECTION
// =============================================================================

pub(crate) async fn run_ws(mut socket: WebSocket, state: AppState, remote_addr: Option<SocketAddr>) {
    // The registry holds the only sender; dropping it there ends this loop.
    let (client_tx, mut client_rx) = mpsc::channel::<Utf8Bytes>(state.config.outbound_buffer);
    let session_id = services::session::connect(&state, client_tx, remote_addr).await;

    info!(%session_id, remote = ?remote_addr, "ws: client connected");

    let replay_at = tokio::time::sleep(state.config.replay_delay);
    tokio::pin!(replay_at);
    let mut replay_pending = true;

    loop {
        tokio::select! {
            () = &mut replay_at, if replay_pending => {
                replay_pending = false;
                let replay = services::replay::take_replay(&state, &session_id).await;
                if send_replay(&mut socket, &replay.frames).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%session_id, error = %e, "ws: transport error");
                        break;
                    }
                };
                let reply = match msg {
                    Message::Text(text) => process_inbound_text(&state, &session_id, text.as_str()).await,
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => process_inbound_text(&state, &session_id, text).await,
                        Err(e) => {
                            warn!(%session_id, error = %e, "ws: binary frame is not utf-8");
                            None
                        }
                    },
                    Message::Close(_) => break,
                    _ => None,
                };
                if let Some(reply) = reply {
                    if send_message(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            outbound = client_rx.recv() => {
                let Some(payload) = outbound else {
                    info!(%session_id, "ws: outbound queue closed, dropping client");
                    break;
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
        }
    }

    services::session::disconnect(&state, &session_id).await;
    info!(%session_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound text frame. Returns the reply for the
/// sender, if any; broadcasts are queued as a side effect.
async fn process_inbound_text(state: &AppState, session_id: &SessionId, text: &str) -> Option<ServerMessage> {
    let msg = match frame::decode(text) {
        Ok(Inbound::Message(msg)) => msg,
        Ok(Inbound::Unknown(kind)) => {
            info!(%session_id, %kind, "ws: unknown message type ignored");
            return None;
        }
        Err(e) => {
            warn!(%session_id, error = %e, "ws: invalid inbound frame");
            return None;
        }
    };

    let _order = if msg.mutates_strokes() { Some(state.stroke_order.lock().await) } else { None };

    match handle_message(state, session_id, msg).await {
        Outcome::BroadcastExcludeSender(out) => {
            services::broadcast::broadcast_except(state, &out, session_id).await;
            None
        }
        Outcome::BroadcastAll(out) => {
            services::broadcast::broadcast_all(state, &out).await;
            None
        }
        Outcome::Reply(out) => Some(out),
        Outcome::Ignore => None,
    }
}

async fn handle_message(state: &AppState, session_id: &SessionId, msg: ClientMessage) -> Outcome {
    match msg {
        ClientMessage::UserJoin { user_color, user_name, platform } => {
            let profile = Profile {
                display_name: user_name.unwrap_or_else(|| DEFAULT_NAME.to_owned()),
                color: user_color.unwrap_or_else(|| DEFAULT_COLOR.to_owned()),
                platform: platform.unwrap_or_else(|| DEFAULT_PLATFORM.to_owned()),
            };
            info!(%session_id, name = %profile.display_name, platform = %profile.platform, "ws: user joined");
            state.sessions.set_profile(session_id, profile).await;
            Outcome::Ignore
        }
        ClientMessage::LineStart { line_id, point, user_color, platform } => {
            let profile = state.sessions.profile(session_id).await;
            let color = user_color
                .or_else(|| profile.as_ref().map(|p| p.color.clone()))
                .unwrap_or_else(|| DEFAULT_COLOR.to_owned());
            let platform = platform.or_else(|| profile.map(|p| p.platform));

            let meta = StrokeMeta { color: color.clone(), platform: platform.clone() };
            let replaced = state
                .strokes
                .begin(StrokeKey::new(session_id, &line_id), point.clone(), meta)
                .await;
            if replaced {
                debug!(%session_id, %line_id, "ws: stroke restarted");
            }

            Outcome::BroadcastExcludeSender(ServerMessage::LineStart {
                line_id,
                point,
                user_color: color,
                user_id: session_id.clone(),
                platform,
                is_replay: None,
            })
        }
        ClientMessage::LineUpdate { line_id, point } => {
            if !state.strokes.append_point(session_id, &line_id, point.clone()).await {
                debug!(%session_id, %line_id, "ws: update for unknown, foreign or ended stroke ignored");
                return Outcome::Ignore;
            }
            Outcome::BroadcastExcludeSender(ServerMessage::LineUpdate { line_id, point })
        }
        ClientMessage::LineEnd { line_id } => {
            let Some(ended) = state.strokes.end(session_id, &line_id).await else {
                debug!(%session_id, %line_id, "ws: end for unknown, foreign or ended stroke ignored");
                return Outcome::Ignore;
            };
            let end_time = ended.end_time;
            let _deletion = state.strokes.schedule_deletion(ended);
            Outcome::BroadcastAll(ServerMessage::LineEnd { line_id, end_time })
        }
        ClientMessage::Tap { point, user_color } => {
            let color = match user_color {
                Some(c) => c,
                None => state
                    .sessions
                    .profile(session_id)
                    .await
                    .map_or_else(|| DEFAULT_COLOR.to_owned(), |p| p.color),
            };
            Outcome::BroadcastExcludeSender(ServerMessage::Tap {
                point,
                user_color: color,
                user_id: session_id.clone(),
                tap_time: now_ms(),
            })
        }
        ClientMessage::Ping => Outcome::Reply(ServerMessage::Pong),
        ClientMessage::Keepalive => Outcome::Ignore,
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_replay(socket: &mut WebSocket, frames: &[ServerMessage]) -> Result<(), ()> {
    for msg in frames {
        send_message(socket, msg).await?;
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let payload = match frame::encode(msg) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize reply");
            return Err(());
        }
    };
    socket.send(Message::Text(payload)).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
