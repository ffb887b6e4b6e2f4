//! Server configuration from environment variables.
//!
//! Every knob has a default so the server starts with an empty environment.
//! A `.env` file in the working directory is loaded first by `main`.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use canvas::stroke::{DEFAULT_MAX_COLOR_LEN, DEFAULT_MAX_POINTS_PER_DELTA, DEFAULT_MAX_WIDTH, StrokeLimits};

use crate::services::delta::LogCaps;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_STROKES_PER_SESSION: usize = 100_000;
pub const DEFAULT_MAX_POINTS_PER_STROKE: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Bound on each connection's outbound queue. A full queue evicts the
    /// participant.
    pub outbound_queue_capacity: usize,
    pub limits: StrokeLimits,
    pub max_strokes_per_session: usize,
    /// Total points one stored stroke may accumulate across all its deltas.
    pub max_points_per_stroke: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            limits: StrokeLimits::default(),
            max_strokes_per_session: DEFAULT_MAX_STROKES_PER_SESSION,
            max_points_per_stroke: DEFAULT_MAX_POINTS_PER_STROKE,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            // mpsc::channel panics on zero capacity.
            outbound_queue_capacity: env_parse("OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_QUEUE_CAPACITY).max(1),
            limits: StrokeLimits {
                max_width: env_parse("MAX_STROKE_WIDTH", DEFAULT_MAX_WIDTH),
                max_color_len: env_parse("MAX_COLOR_LEN", DEFAULT_MAX_COLOR_LEN),
                max_points_per_delta: env_parse("MAX_POINTS_PER_DELTA", DEFAULT_MAX_POINTS_PER_DELTA),
            },
            max_strokes_per_session: env_parse("MAX_STROKES_PER_SESSION", DEFAULT_MAX_STROKES_PER_SESSION),
            max_points_per_stroke: env_parse("MAX_POINTS_PER_STROKE", DEFAULT_MAX_POINTS_PER_STROKE),
        }
    }

    #[must_use]
    pub fn log_caps(&self) -> LogCaps {
        LogCaps { max_strokes: self.max_strokes_per_session, max_points_per_stroke: self.max_points_per_stroke }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
