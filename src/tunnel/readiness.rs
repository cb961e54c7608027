//! Readiness polling
//!
//! The tunnel signals readiness by creating a marker file. This loop runs
//! inside the `wait-ready` helper on the build slave; its exit code is all
//! the supervising step looks at.

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::common::config::ReadinessConfig;
use crate::common::{Error, Result};

/// Exit code of `wait-ready` when the deadline passes
pub const READY_TIMEOUT_EXIT_CODE: i32 = 1;

/// Time source for the polling loop
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deadline and poll interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Poll `is_ready` until it returns true or the deadline passes
///
/// The readiness check runs before every deadline check, so a marker that shows up
/// during the final interval is still observed. Sleeps never overshoot the
/// deadline. Returns the elapsed time on success.
pub async fn wait_for_ready<C, F>(clock: &C, policy: &ReadinessPolicy, mut is_ready: F) -> Result<Duration>
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    let start = clock.now();
    let deadline = start + policy.timeout;
    // A zero interval would spin
    let interval = policy.poll_interval.max(Duration::from_millis(100));

    loop {
        if is_ready() {
            let elapsed = clock.now().duration_since(start);
            tracing::info!(elapsed_secs = elapsed.as_secs(), "Tunnel is ready");
            return Ok(elapsed);
        }

        let now = clock.now();
        if now >= deadline {
            tracing::warn!(
                timeout_secs = policy.timeout.as_secs(),
                "Tunnel didn't start in time"
            );
            return Err(Error::TunnelTimeout(policy.timeout.as_secs()));
        }

        tracing::debug!(
            remaining_secs = (deadline - now).as_secs(),
            "Waiting for ready marker"
        );
        clock.sleep(interval.min(deadline - now)).await;
    }
}

/// Wait for the marker file at `readyfile` on the wall clock
pub async fn wait_for_marker(readyfile: &Path, policy: &ReadinessPolicy) -> Result<Duration> {
    wait_for_ready(&SystemClock, policy, || readyfile.exists()).await
}
