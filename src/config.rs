//! Relay configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Only `PORT` is strict: a value that does not parse as a port aborts
//! startup. The stroke and timing tunables fall back to their defaults when
//! unset or unparseable so a typo never keeps the relay from listening.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 10_000;
pub const DEFAULT_POINT_CAP: usize = 500;
pub const DEFAULT_END_GRACE_MS: u64 = 5_000;
pub const DEFAULT_ENDED_RETENTION_MS: u64 = 10_000;
pub const DEFAULT_ORPHAN_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REPLAY_DELAY_MS: u64 = 500;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1024;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0:?}")]
    InvalidPort(String),
}

/// Stroke lifetime tunables, shared by the store and the sweep task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeLimits {
    /// Max retained points per stroke; oldest points are dropped first.
    pub point_cap: usize,
    /// Wait between `line_end` and the scheduled deletion.
    pub end_grace: Duration,
    /// Ended strokes older than this are reaped by the sweep.
    pub ended_retention: Duration,
    /// Strokes that never ended are reaped once older than this.
    pub orphan_timeout: Duration,
}

impl StrokeLimits {
    /// Clamp values that would break the lifetime invariants: at least one
    /// point is retained, and the sweep never reaps an ended stroke before
    /// its grace delay has passed.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.point_cap = self.point_cap.max(1);
        if self.ended_retention < self.end_grace {
            self.ended_retention = self.end_grace;
        }
        self
    }
}

impl Default for StrokeLimits {
    fn default() -> Self {
        Self {
            point_cap: DEFAULT_POINT_CAP,
            end_grace: Duration::from_millis(DEFAULT_END_GRACE_MS),
            ended_retention: Duration::from_millis(DEFAULT_ENDED_RETENTION_MS),
            orphan_timeout: Duration::from_millis(DEFAULT_ORPHAN_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    pub strokes: StrokeLimits,
    pub sweep_interval: Duration,
    pub replay_delay: Duration,
    /// Capacity of each session's outbound frame queue.
    pub outbound_buffer: usize,
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            strokes: StrokeLimits::default(),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            replay_delay: Duration::from_millis(DEFAULT_REPLAY_DELAY_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl RelayConfig {
    /// Build typed relay config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 10000
    /// - `STROKE_POINT_CAP`: default 500
    /// - `STROKE_END_GRACE_MS`: default 5000
    /// - `STROKE_ENDED_RETENTION_MS`: default 10000
    /// - `STROKE_ORPHAN_TIMEOUT_MS`: default 120000
    /// - `SWEEP_INTERVAL_MS`: default 30000
    /// - `REPLAY_DELAY_MS`: default 500
    /// - `OUTBOUND_BUFFER`: default 1024
    /// - `MAX_MESSAGE_BYTES`: default 10 MiB
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] if `PORT` is set but not a valid port.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. `from_env` delegates here.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let ms = |key: &str, default: u64| Duration::from_millis(parse_or(&lookup, key, default));

        let strokes = StrokeLimits {
            point_cap: parse_or(&lookup, "STROKE_POINT_CAP", DEFAULT_POINT_CAP),
            end_grace: ms("STROKE_END_GRACE_MS", DEFAULT_END_GRACE_MS),
            ended_retention: ms("STROKE_ENDED_RETENTION_MS", DEFAULT_ENDED_RETENTION_MS),
            orphan_timeout: ms("STROKE_ORPHAN_TIMEOUT_MS", DEFAULT_ORPHAN_TIMEOUT_MS),
        }
        .normalized();

        // A zero interval would make `tokio::time::interval` panic.
        let sweep_interval = ms("SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS).max(Duration::from_millis(1));

        Ok(Self {
            port,
            strokes,
            sweep_interval,
            replay_delay: ms("REPLAY_DELAY_MS", DEFAULT_REPLAY_DELAY_MS),
            outbound_buffer: parse_or(&lookup, "OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER).max(1),
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
