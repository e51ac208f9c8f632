//! Stroke store — in-progress and recently ended strokes.
//!
//! DESIGN
//! ======
//! Strokes are keyed by `(owner, line_id)`. Every mutation addresses a
//! stroke through the sender's own session id, so a session can never reach
//! a stroke it does not own: the lookup simply misses. Client ids only need
//! to be unique per owner, and a begin with a reused id replaces that
//! owner's previous stroke (implicit restart).
//!
//! LIFECYCLE
//! =========
//! begin → append* → end → (grace delay) → scheduled deletion.
//! The periodic sweep is the backstop: it reaps ended strokes past their
//! retention window and strokes that never ended within the orphan timeout.
//! Disconnects cascade through [`StrokeStore::remove_owned_by`].
//!
//! Each stored stroke carries a generation number. A scheduled deletion
//! only removes the generation it was scheduled for, so a restarted stroke
//! with the same id is not taken down by its predecessor's timer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::StrokeLimits;
use crate::frame::{Point, now_ms};
use crate::services::registry::SessionId;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrokeKey {
    pub owner: SessionId,
    pub line_id: String,
}

impl StrokeKey {
    #[must_use]
    pub fn new(owner: &SessionId, line_id: &str) -> Self {
        Self { owner: owner.clone(), line_id: line_id.to_owned() }
    }
}

/// Metadata fixed at `line_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrokeMeta {
    pub color: String,
    pub platform: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stroke {
    pub line_id: String,
    pub owner: SessionId,
    pub color: String,
    pub platform: Option<String>,
    /// Most recent points, oldest first. Bounded by the point cap.
    pub points: VecDeque<Point>,
    pub created_at: Instant,
    /// `None` while the stroke is in progress.
    pub ended_at: Option<Instant>,
    /// Wall-clock end time (ms since epoch) broadcast with `line_end`.
    pub end_time: Option<i64>,
    generation: u64,
}

impl Stroke {
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    #[cfg(test)]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Handle returned by a successful [`StrokeStore::end`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedStroke {
    pub key: StrokeKey,
    pub generation: u64,
    pub end_time: i64,
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct StrokeStore {
    strokes: Arc<RwLock<HashMap<StrokeKey, Stroke>>>,
    next_generation: Arc<AtomicU64>,
    limits: StrokeLimits,
}

impl StrokeStore {
    #[must_use]
    pub fn new(limits: StrokeLimits) -> Self {
        Self {
            strokes: Arc::new(RwLock::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            limits: limits.normalized(),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn limits(&self) -> StrokeLimits {
        self.limits
    }

    /// Insert a new stroke. Returns true if it replaced an earlier stroke
    /// with the same key.
    pub async fn begin(&self, key: StrokeKey, first_point: Point, meta: StrokeMeta) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let stroke = Stroke {
            line_id: key.line_id.clone(),
            owner: key.owner.clone(),
            color: meta.color,
            platform: meta.platform,
            points: VecDeque::from([first_point]),
            created_at: Instant::now(),
            ended_at: None,
            end_time: None,
            generation,
        };
        let mut strokes = self.strokes.write().await;
        strokes.insert(key, stroke).is_some()
    }

    /// Append a point to an in-progress stroke owned by `owner`. Returns
    /// false if there is no such stroke or it has already ended.
    pub async fn append_point(&self, owner: &SessionId, line_id: &str, point: Point) -> bool {
        let key = StrokeKey::new(owner, line_id);
        let mut strokes = self.strokes.write().await;
        let Some(stroke) = strokes.get_mut(&key) else {
            return false;
        };
        if stroke.is_ended() {
            return false;
        }
        stroke.points.push_back(point);
        while stroke.points.len() > self.limits.point_cap {
            stroke.points.pop_front();
        }
        true
    }

    /// Mark a stroke owned by `owner` as ended. Returns `None` if there is
    /// no such stroke or it was already ended.
    pub async fn end(&self, owner: &SessionId, line_id: &str) -> Option<EndedStroke> {
        let key = StrokeKey::new(owner, line_id);
        let mut strokes = self.strokes.write().await;
        let stroke = strokes.get_mut(&key)?;
        if stroke.is_ended() {
            return None;
        }
        let end_time = now_ms();
        stroke.ended_at = Some(Instant::now());
        stroke.end_time = Some(end_time);
        Some(EndedStroke { generation: stroke.generation, key, end_time })
    }

    /// Spawn the grace-delay deletion for an ended stroke.
    pub fn schedule_deletion(&self, ended: EndedStroke) -> JoinHandle<()> {
        let store = self.clone();
        let grace = self.limits.end_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if store.remove_generation(&ended.key, ended.generation).await {
                debug!(line_id = %ended.key.line_id, owner = %ended.key.owner, "strokes: ended stroke deleted");
            }
        })
    }

    /// Remove the stroke at `key` only if it is still the given generation.
    pub async fn remove_generation(&self, key: &StrokeKey, generation: u64) -> bool {
        let mut strokes = self.strokes.write().await;
        if strokes.get(key).is_some_and(|s| s.generation == generation) {
            strokes.remove(key);
            return true;
        }
        false
    }

    /// Remove every stroke owned by `owner`. Returns the number removed.
    pub async fn remove_owned_by(&self, owner: &SessionId) -> usize {
        let mut strokes = self.strokes.write().await;
        let before = strokes.len();
        strokes.retain(|key, _| &key.owner != owner);
        before - strokes.len()
    }

    /// Point-in-time copy of all strokes, oldest first.
    pub async fn snapshot(&self) -> Vec<Stroke> {
        let strokes = self.strokes.read().await;
        let mut out: Vec<Stroke> = strokes.values().cloned().collect();
        drop(strokes);
        out.sort_by_key(|s| s.generation);
        out
    }

    #[cfg(test)]
    pub async fn get(&self, owner: &SessionId, line_id: &str) -> Option<Stroke> {
        let strokes = self.strokes.read().await;
        strokes.get(&StrokeKey::new(owner, line_id)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.strokes.read().await.len()
    }

    /// Reap ended strokes past the retention window and never-ended strokes
    /// past the orphan timeout. Returns the number removed.
    pub async fn sweep(&self, now: Instant) -> usize {
        let limits = self.limits;
        let mut strokes = self.strokes.write().await;
        let before = strokes.len();
        strokes.retain(|_, stroke| match stroke.ended_at {
            Some(ended_at) => now.saturating_duration_since(ended_at) <= limits.ended_retention,
            None => now.saturating_duration_since(stroke.created_at) <= limits.orphan_timeout,
        });
        before - strokes.len()
    }
}

#[cfg(test)]
#[path = "strokes_test.rs"]
mod tests;
