//! Frame — the JSON wire protocol spoken over the drawing socket.
//!
//! ARCHITECTURE
//! ============
//! Every websocket text frame is one JSON object with a mandatory `type`
//! discriminator. Inbound frames decode into [`ClientMessage`]; everything
//! the relay sends is a [`ServerMessage`]. Field names on the wire are
//! camelCase (`lineId`, `userColor`), kinds are `snake_case`.
//!
//! DESIGN
//! ======
//! Decoding is two-phase: the raw JSON is parsed first so an unrecognized
//! `type` can be reported by name as [`Inbound::Unknown`] instead of being
//! lumped in with malformed payloads. Only known kinds go through the typed
//! decode, where missing required fields surface as [`FrameError::Malformed`].

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::services::registry::SessionId;

/// Inbound kinds the router understands. Anything else is `Inbound::Unknown`.
const KNOWN_KINDS: &[&str] = &["user_join", "line_start", "line_update", "line_end", "tap", "ping", "keepalive"];

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("malformed {kind} frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

// =============================================================================
// POINT
// =============================================================================

/// One sampled position of a stroke. Coordinates are required; they and
/// any extra fields the client attaches (pressure, timestamps) are relayed
/// exactly as received, integers staying integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: Number,
    pub y: Number,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Point {
    #[cfg(test)]
    #[must_use]
    pub fn new(x: i64, y: i64) -> Self {
        Self { x: x.into(), y: y.into(), extra: serde_json::Map::new() }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    UserJoin {
        user_color: Option<String>,
        user_name: Option<String>,
        platform: Option<String>,
    },
    LineStart {
        #[serde(deserialize_with = "line_id")]
        line_id: String,
        point: Point,
        user_color: Option<String>,
        platform: Option<String>,
    },
    LineUpdate {
        #[serde(deserialize_with = "line_id")]
        line_id: String,
        point: Point,
    },
    LineEnd {
        #[serde(deserialize_with = "line_id")]
        line_id: String,
    },
    Tap {
        point: Point,
        user_color: Option<String>,
    },
    Ping,
    Keepalive,
}

impl ClientMessage {
    /// True for the kinds that change the stroke store.
    #[must_use]
    pub fn mutates_strokes(&self) -> bool {
        matches!(self, Self::LineStart { .. } | Self::LineUpdate { .. } | Self::LineEnd { .. })
    }
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ClientMessage),
    /// Well-formed JSON object whose `type` the relay does not handle.
    Unknown(String),
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns a [`FrameError`] if the text is not a JSON object with a string
/// `type`, or if a known kind is missing required fields.
pub fn decode(text: &str) -> Result<Inbound, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(Inbound::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Inbound::Message)
        .map_err(|source| FrameError::Malformed { kind, source })
}

/// Clients generate stroke ids as strings or numbers; both map to a string key.
fn line_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Pong,
    UserCount {
        count: usize,
    },
    LineStart {
        line_id: String,
        point: Point,
        user_color: String,
        user_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_replay: Option<bool>,
    },
    LineUpdate {
        line_id: String,
        point: Point,
    },
    LineEnd {
        line_id: String,
        /// Milliseconds since Unix epoch; shared by every client so fades agree.
        end_time: i64,
    },
    Tap {
        point: Point,
        user_color: String,
        user_id: SessionId,
        tap_time: i64,
    },
}

impl ServerMessage {
    /// Wire name of this message, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::UserCount { .. } => "user_count",
            Self::LineStart { .. } => "line_start",
            Self::LineUpdate { .. } => "line_update",
            Self::LineEnd { .. } => "line_end",
            Self::Tap { .. } => "tap",
        }
    }

    /// Stroke frames are held back from a joiner until its replay is taken.
    #[must_use]
    pub fn is_stroke_traffic(&self) -> bool {
        matches!(self, Self::LineStart { .. } | Self::LineUpdate { .. } | Self::LineEnd { .. })
    }
}

/// Serialize a message once into a cheaply cloneable text payload.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode(msg: &ServerMessage) -> Result<Utf8Bytes, FrameError> {
    serde_json::to_string(msg)
        .map(Utf8Bytes::from)
        .map_err(FrameError::Encode)
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
