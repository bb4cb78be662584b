//! Inter-batch rate limiting
//!
//! With a [`RateLimit`] configured, the dispatcher splits a batch into
//! chunks of `capacity` units, runs each chunk to completion and sleeps
//! for `delay` before admitting the next chunk. There is never a pause
//! after the final chunk.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Whether a chunk that contained failures is followed by the pause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Pause between every pair of chunks
    #[default]
    Always,
    /// Go straight to the next chunk if the previous one had a failure
    SkipAfterFailure,
}

impl std::str::FromStr for PausePolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(PausePolicy::Always),
            "skip_after_failure" | "skip-after-failure" => Ok(PausePolicy::SkipAfterFailure),
            other => Err(DispatchError::InvalidEnv {
                name: "FANOUT_PAUSE_POLICY".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Pause inserted between consecutive chunks of a batch
///
/// # Example
///
/// ```
/// use fanout_dispatch::{PausePolicy, RateLimit};
/// use std::time::Duration;
///
/// let limit = RateLimit::new(Duration::from_millis(500))
///     .with_pause_policy(PausePolicy::SkipAfterFailure);
/// assert!(!limit.should_pause(true));
/// assert!(limit.should_pause(false));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(with = "crate::config::duration_millis")]
    pub delay: Duration,
    #[serde(default)]
    pub pause: PausePolicy,
}

impl RateLimit {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pause: PausePolicy::Always,
        }
    }

    pub fn with_pause_policy(mut self, pause: PausePolicy) -> Self {
        self.pause = pause;
        self
    }

    /// Whether to pause after a chunk, given whether it had any failure
    pub fn should_pause(&self, chunk_had_failure: bool) -> bool {
        if self.delay.is_zero() {
            return false;
        }
        match self.pause {
            PausePolicy::Always => true,
            PausePolicy::SkipAfterFailure => !chunk_had_failure,
        }
    }
}
