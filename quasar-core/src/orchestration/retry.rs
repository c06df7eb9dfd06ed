use std::future::Future;
use std::time::Duration;

use quasar_model::SessionId;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::config::RetryConfig;
use super::context::Interrupt;
use crate::error::{BackendError, EngineError, Result};

/// Exponential backoff with deterministic jitter.
///
/// The jitter is derived from a SHA-256 digest of the session id and the
/// attempt number, so it is identical across processes and toolchains and a
/// replayed session waits exactly as long as the original did.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay before retry number `attempt` (1-based). A server-provided
    /// `retry_after` hint is honoured when it asks for longer.
    pub fn delay_for(
        &self,
        session_id: SessionId,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let backoff = self.backoff_ms(attempt);
        let delay = if backoff == 0 {
            0
        } else {
            self.spread(backoff, jitter_unit(session_id, attempt))
        };
        let hinted = retry_after.map_or(0, |hint| hint.as_millis() as u64);
        Duration::from_millis(delay.max(hinted))
    }

    /// `backoff_base_ms * 2^(attempt - 1)`, capped at `backoff_max_ms`.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let Some(doublings) = attempt.checked_sub(1) else {
            return 0;
        };
        let factor = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
        self.config
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.config.backoff_max_ms)
    }

    /// Places `backoff` within `backoff ± span` at `unit` in `[0, 1]`, never
    /// beyond `backoff_max_ms`.
    fn spread(&self, backoff: u64, unit: f64) -> u64 {
        let max = self.config.backoff_max_ms;
        let ratio = f64::from(self.config.jitter_ratio.max(0.0));
        let span = ((backoff as f64 * ratio) as u64)
            .max(self.config.jitter_min_ms)
            .min(max);

        let low = backoff.saturating_sub(span);
        let high = backoff.saturating_add(span).min(max);
        if high <= low {
            return low;
        }
        low + ((high - low) as f64 * unit).round() as u64
    }
}

fn jitter_unit(session_id: SessionId, attempt: u32) -> f64 {
    let digest = Sha256::new()
        .chain_update(session_id.as_uuid().as_bytes())
        .chain_update(attempt.to_be_bytes())
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) as f64 / u64::MAX as f64
}

/// Value produced by [`run_with_retry`] plus the retries it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Drives one backend call through the retry policy.
///
/// Fatal errors return immediately as [`EngineError::Backend`]. Retryable
/// errors are retried at most `max_retries` times; exhaustion yields
/// [`EngineError::BackendConnection`]. Backoff sleeps end early on
/// cancellation or deadline.
pub async fn run_with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    session_id: SessionId,
    interrupt: &Interrupt,
    operation: &'static str,
    mut on_retry: R,
    mut call: F,
) -> Result<Retried<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BackendError>>,
    R: FnMut(u32, Duration, &BackendError),
{
    let mut retries = 0u32;
    loop {
        interrupt.check()?;
        match call().await {
            Ok(value) => return Ok(Retried { value, retries }),
            Err(err) if !err.is_retryable() => {
                warn!(%session_id, operation, error = %err, "fatal backend error");
                return Err(EngineError::Backend(err));
            }
            Err(err) if retries >= policy.max_retries() => {
                warn!(
                    %session_id,
                    operation,
                    attempts = retries + 1,
                    error = %err,
                    "backend retries exhausted"
                );
                return Err(EngineError::BackendConnection {
                    attempts: retries + 1,
                    source: err,
                });
            }
            Err(err) => {
                retries += 1;
                let delay = policy.delay_for(session_id, retries, err.retry_after());
                debug!(
                    %session_id,
                    operation,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying backend call"
                );
                on_retry(retries, delay, &err);
                interrupt.sleep(delay).await?;
            }
        }
    }
}
