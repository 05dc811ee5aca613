//! Shared rate-limit coordination.
//!
//! All syncers consult one gate before every upstream call. The upstream
//! client records the latest `{remaining, reset}` observation on every
//! response; when the remaining budget runs low the gate sleeps until the
//! window resets, and because the sleep happens under the gate's async
//! lock, syncers serialize through it instead of stampeding.

use std::sync::Mutex as StdMutex;

use chrono::Utc;
use tracing::info;

use crate::upstream::RateLimit;

const LOG_TARGET: &str = "bor::ratelimit";

/// Remaining-call threshold below which the gate waits for the reset.
const LOW_WATER: i64 = 100;

/// The shared gate. Cheap to clone behind an `Arc`.
#[derive(Default)]
pub struct RateGate {
    observation: StdMutex<Option<RateLimit>>,
    gate: tokio::sync::Mutex<()>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the latest observation. Called by the upstream client on
    /// every response.
    pub fn observe(&self, limit: RateLimit) {
        let mut slot = self.observation.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(limit);
    }

    /// Returns the latest observation, if any.
    pub fn current(&self) -> Option<RateLimit> {
        *self.observation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the budget allows another call. An exhausted budget
    /// (`remaining == 0`) and a nearly exhausted one (`0 < remaining <
    /// 100`) both sleep until the reset time.
    pub async fn wait_if_low(&self) {
        let _serialized = self.gate.lock().await;

        let Some(limit) = self.current() else { return };
        let low = limit.remaining == 0 || (limit.remaining > 0 && limit.remaining < LOW_WATER);
        if !low {
            return;
        }

        let now = Utc::now();
        if limit.reset <= now {
            return;
        }
        let wait = (limit.reset - now).to_std().unwrap_or_default();
        info!(
            target: LOG_TARGET,
            remaining = limit.remaining,
            wait_secs = wait.as_secs(),
            "rate limit low, sleeping until reset"
        );
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn passes_when_budget_is_healthy() {
        let gate = RateGate::new();
        gate.observe(RateLimit {
            remaining: 4000,
            reset: Utc::now() + Duration::hours(1),
        });
        // Must return immediately.
        gate.wait_if_low().await;
    }

    #[tokio::test]
    async fn passes_when_no_observation_yet() {
        let gate = RateGate::new();
        gate.wait_if_low().await;
    }

    #[tokio::test]
    async fn sleeps_until_reset_when_exhausted() {
        let gate = RateGate::new();
        gate.observe(RateLimit {
            remaining: 0,
            reset: Utc::now() + Duration::milliseconds(30),
        });
        let started = std::time::Instant::now();
        gate.wait_if_low().await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    }

    #[tokio::test]
    async fn low_but_nonzero_budget_also_sleeps() {
        let gate = RateGate::new();
        gate.observe(RateLimit {
            remaining: 42,
            reset: Utc::now() + Duration::milliseconds(30),
        });
        let started = std::time::Instant::now();
        gate.wait_if_low().await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    }

    #[tokio::test]
    async fn past_reset_does_not_sleep() {
        let gate = RateGate::new();
        gate.observe(RateLimit {
            remaining: 0,
            reset: Utc::now() - Duration::seconds(5),
        });
        gate.wait_if_low().await;
    }
}
