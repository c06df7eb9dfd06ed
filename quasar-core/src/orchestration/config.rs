use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs that tune orchestrator behaviour.
///
/// Every field carries a default so configuration documents only need to
/// mention what they change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Sessions that may hold a worker slot at the same time.
    pub worker_pool_size: usize,
    /// How long a queued session waits for a worker slot and a backend lease.
    pub queue_timeout_ms: u64,
    /// Wall-clock budget for a whole session, from creation to terminal state.
    pub session_timeout_ms: u64,
    pub phase_timeouts: PhaseTimeouts,
    /// Grace period for a cancelled or timed-out session to wind down,
    /// including backend cancel confirmation.
    pub cancel_timeout_ms: u64,
    /// Delay between backend job status polls.
    pub poll_interval_ms: u64,
    /// Retry/backoff policy for backend calls.
    pub retry: RetryConfig,
    /// Backend used when a session request names none. Without one, the
    /// least-loaded backend able to run the module is picked.
    pub default_backend: Option<String>,
    /// Buffered events per subscriber before slow subscribers start lagging.
    pub event_capacity: usize,
    /// Finished sessions kept addressable by id. Older ones are only
    /// reachable through the archive.
    pub retained_sessions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            queue_timeout_ms: 30_000,
            session_timeout_ms: 10 * 60 * 1_000,
            phase_timeouts: PhaseTimeouts::default(),
            cancel_timeout_ms: 5_000,
            poll_interval_ms: 100,
            retry: RetryConfig::default(),
            default_backend: None,
            event_capacity: 1_024,
            retained_sessions: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Deadlines for the individual non-terminal phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub validating_ms: u64,
    pub queued_ms: u64,
    pub running_ms: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            validating_ms: 5_000,
            queued_ms: 60_000,
            running_ms: 5 * 60 * 1_000,
        }
    }
}

impl PhaseTimeouts {
    pub fn validating(&self) -> Duration {
        Duration::from_millis(self.validating_ms)
    }

    pub fn queued(&self) -> Duration {
        Duration::from_millis(self.queued_ms)
    }

    pub fn running(&self) -> Duration {
        Duration::from_millis(self.running_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter in milliseconds so short delays still spread a bit.
    pub jitter_min_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
            jitter_ratio: 0.2,
            jitter_min_ms: 10,
        }
    }
}
