//! Failure guard
//!
//! Wraps calls to tiers whose failure is externally observable (disk and
//! shared) in retry-with-backoff behind a per-tier circuit breaker.
//!
//! The breaker has three states. *Closed* passes calls through; after
//! `failure_threshold` consecutive failures it *opens* and short-circuits
//! every call for a cooldown period; the first call after the cooldown is a
//! single *half-open* probe whose outcome closes or re-opens the circuit.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::tiers::TierKind;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls are short-circuited to failure
    Open,
    /// One probe is in flight
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Retry/backoff plus circuit breaker for one tier.
pub struct FailureGuard {
    tier: TierKind,
    retry_attempts: u32,
    base_delay: Duration,
    failure_threshold: u32,
    cooldown: Duration,
    call_timeout: Option<Duration>,
    inner: Mutex<BreakerInner>,
}

impl FailureGuard {
    pub fn new(
        tier: TierKind,
        retry_attempts: u32,
        base_delay: Duration,
        failure_threshold: u32,
        cooldown: Duration,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            tier,
            retry_attempts: retry_attempts.max(1),
            base_delay,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            call_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current breaker state, after applying any due cooldown transition.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a call may proceed. An open circuit past its cooldown admits
    /// exactly one half-open probe.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.cooldown);
                if cooled {
                    debug!(tier = %self.tier, "circuit half-open, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            debug!(tier = %self.tier, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        let should_open = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if should_open {
            if inner.state != BreakerState::Open {
                warn!(
                    tier = %self.tier,
                    failures = inner.consecutive_failures,
                    "circuit opened"
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Run a guarded operation with retry, backoff, timeout, and breaker
    /// accounting. The last error is returned once retries are exhausted.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.admit() {
            return Err(Error::unavailable(
                self.tier.to_string(),
                "circuit breaker open",
            ));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = match self.call_timeout {
                Some(limit) => match timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::unavailable(
                        self.tier.to_string(),
                        format!("call timed out after {limit:?}"),
                    )),
                },
                None => op().await,
            };

            match outcome {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if attempt >= self.retry_attempts => {
                    self.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    debug!(
                        tier = %self.tier,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "guarded call failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn make_guard(attempts: u32, threshold: u32, cooldown: Duration) -> FailureGuard {
        FailureGuard::new(
            TierKind::Disk,
            attempts,
            Duration::from_millis(1),
            threshold,
            cooldown,
            None,
        )
    }

    fn fail() -> Result<u32> {
        Err(Error::unavailable("disk", "boom"))
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let guard = make_guard(3, 5, Duration::from_secs(60));
        let result = guard.run(|| async { Ok(42u32) }).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(guard.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let guard = make_guard(3, 5, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result = guard
            .run(move || {
                let calls = calls_ref.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        fail()
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let guard = make_guard(2, 5, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<u32> = guard
            .run(move || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    fail()
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let guard = make_guard(1, 3, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = guard.run(|| async { fail() }).await;
        }
        assert_eq!(guard.state(), BreakerState::Open);

        // Short-circuited without invoking the operation.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let result: Result<u32> = guard
            .run(move || {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let guard = make_guard(1, 1, Duration::from_millis(5));
        let _ = guard.run(|| async { fail() }).await;
        assert_eq!(guard.state(), BreakerState::Open);

        sleep(Duration::from_millis(10)).await;
        let result = guard.run(|| async { Ok(1u32) }).await;
        assert!(result.is_ok());
        assert_eq!(guard.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let guard = make_guard(1, 1, Duration::from_millis(5));
        let _ = guard.run(|| async { fail() }).await;

        sleep(Duration::from_millis(10)).await;
        let result: Result<u32> = guard.run(|| async { fail() }).await;
        assert!(result.is_err());
        assert_eq!(guard.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let guard = FailureGuard::new(
            TierKind::Shared,
            1,
            Duration::from_millis(1),
            1,
            Duration::from_secs(60),
            Some(Duration::from_millis(10)),
        );

        let result: Result<u32> = guard
            .run(|| async {
                sleep(Duration::from_secs(10)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(Error::TierUnavailable { .. })));
        assert_eq!(guard.state(), BreakerState::Open);
    }
}
