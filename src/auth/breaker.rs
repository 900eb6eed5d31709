//! Circuit breaker for fallible downstream dependencies.
//!
//! One instance guards one dependency for the lifetime of the process;
//! construct breakers once at startup and inject them, never per request.
//! Counters sit behind a std mutex that is never held across an await, so
//! the failure-threshold transition stays a serialized read-modify-write.

use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure of a breaker-guarded call. `Open` means the breaker
/// short-circuited and the dependency was never invoked; `Inner` carries
/// the dependency's own error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerError<E> {
    #[error("circuit breaker {name} is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },
    #[error("{0}")]
    Inner(E),
}

/// Read-only statistics snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    times_opened: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

enum Admission {
    Allowed,
    Rejected(Duration),
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(
            "initialized circuit breaker {name} (threshold: {DEFAULT_FAILURE_THRESHOLD}, \
             recovery: {DEFAULT_RECOVERY_TIMEOUT:?})"
        );
        Self {
            name,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_since: None,
                total_calls: 0,
                successful_calls: 0,
                failed_calls: 0,
                times_opened: 0,
            }),
        }
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Run `op` through the breaker, counting every error as a failure.
    ///
    /// # Errors
    ///
    /// `BreakerError::Open` when the call is short-circuited, otherwise
    /// `BreakerError::Inner` wrapping the operation's own error.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        E: std::fmt::Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(op, |_| true).await
    }

    /// Run `op` through the breaker with a failure predicate.
    ///
    /// Errors for which `counts_as_failure` returns false propagate
    /// unchanged and do not move the breaker toward opening; they are
    /// bugs or unrelated conditions, not dependency failures.
    ///
    /// # Errors
    ///
    /// See [`CircuitBreaker::call`].
    pub async fn call_with<T, E, F, Fut>(
        &self,
        op: F,
        counts_as_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        E: std::fmt::Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Rejected(retry_in) => {
                warn!("circuit breaker {} is open, failing fast", self.name);
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_in,
                });
            }
            Admission::Allowed => {}
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if counts_as_failure(&err) {
                    self.on_failure();
                } else {
                    error!("circuit breaker {} saw an uncounted error: {err:?}", self.name);
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning OPEN → HALF_OPEN
    /// when the recovery timeout has elapsed. Exactly one caller wins the
    /// half-open trial; the rest are rejected until it resolves. A trial
    /// dropped mid-flight (cancelled request) never reports back, so a
    /// stale trial is replaced once the recovery timeout elapses again.
    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        inner.total_calls += 1;
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => {
                let elapsed = inner
                    .half_open_since
                    .map_or(self.recovery_timeout, |at| at.elapsed());
                if elapsed >= self.recovery_timeout {
                    warn!(
                        "circuit breaker {} half-open trial went unanswered, admitting a new one",
                        self.name
                    );
                    inner.half_open_since = Some(Instant::now());
                    Admission::Allowed
                } else {
                    Admission::Rejected(self.recovery_timeout - elapsed)
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(self.recovery_timeout, |at| at.elapsed());
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_since = Some(Instant::now());
                    info!("circuit breaker {} transitioning to half-open", self.name);
                    Admission::Allowed
                } else {
                    Admission::Rejected(self.recovery_timeout - elapsed)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.successful_calls += 1;
        if inner.state == CircuitState::HalfOpen {
            info!("circuit breaker {} closed after successful recovery", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_since = None;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failed_calls += 1;
        inner.failure_count += 1;

        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.failure_count >= self.failure_threshold);
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_since = None;
            inner.times_opened += 1;
            error!(
                "circuit breaker {} opened after {} failures, retrying in {:?}",
                self.name, inner.failure_count, self.recovery_timeout
            );
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            times_opened: inner.times_opened,
        }
    }

    /// Force the breaker closed. Administrative recovery only.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_since = None;
        info!("circuit breaker {} manually reset to closed", self.name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Counter updates cannot panic, so the lock cannot be poisoned in
        // practice; recover rather than propagate if it ever is.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Transient,
        Bug,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test")
            .with_failure_threshold(threshold)
            .with_recovery_timeout(recovery)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        breaker.call(|| async { Err::<(), _>(TestError::Transient) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        breaker.call(|| async { Ok::<_, TestError>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fourth call is rejected without invoking the operation.
        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .call(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<_, TestError>(()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        // Still closed: the success zeroed the count.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_success_closes_the_circuit() {
        let breaker = breaker(2, Duration::from_millis(30));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_restarts_the_timer() {
        let breaker = breaker(2, Duration::from_millis(30));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timer restarted: an immediate call is still rejected.
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn abandoned_half_open_trial_is_replaced_after_recovery_timeout() {
        let breaker = breaker(1, Duration::from_millis(20));
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Win the half-open trial, then drop it mid-flight the way a
        // cancelled request handler would.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let trial = breaker.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, TestError>(())
        });
        tokio::time::timeout(Duration::from_millis(5), trial)
            .await
            .ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // While the trial is fresh, concurrent callers are still rejected.
        assert!(matches!(
            succeed(&breaker).await,
            Err(BreakerError::Open { .. })
        ));

        // The dropped trial never resolves; after another recovery timeout
        // a new trial is admitted and can close the circuit.
        tokio::time::sleep(Duration::from_millis(30)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn uncounted_errors_propagate_without_tripping() {
        let breaker = breaker(2, Duration::from_secs(60));
        for _ in 0..5 {
            let result = breaker
                .call_with(
                    || async { Err::<(), _>(TestError::Bug) },
                    |err| *err == TestError::Transient,
                )
                .await;
            assert_eq!(result, Err(BreakerError::Inner(TestError::Bug)));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn stats_track_calls_and_openings() {
        let breaker = breaker(2, Duration::from_secs(60));
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        let stats = breaker.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.failed_calls, 2);
        assert_eq!(stats.times_opened, 1);
        assert_eq!(stats.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let breaker = breaker(1, Duration::from_secs(60));
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();
    }
}
