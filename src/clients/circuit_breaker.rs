use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::NotificationError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitSnapshot, CircuitState},
};

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped every time the breaker opens.
    generation: u64,
}

/// Admission granted to one call. Outcomes are only applied to the state the
/// permit was issued for.
#[derive(Clone, Copy)]
enum Permit {
    Normal { generation: u64 },
    Trial,
}

/// In-process circuit breaker for one dependency.
///
/// Shared between tasks through `Arc`. Every transition happens inside a single
/// lock acquisition and the lock is never held across an `.await`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(service = %config.service_name, "Circuit breaker initialized");

        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_time: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, NotificationError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, NotificationError>>,
    {
        let permit = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(permit, Permit::Trial),
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Err(e) if e.is_dependency_failure() => self.record_failure(permit),
            _ => self.record_success(permit),
        }

        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(&self) -> Result<Permit, NotificationError> {
        let mut inner = self.lock();

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Permit::Normal {
                generation: inner.generation,
            }),
            CircuitState::Open => {
                let elapsed_past_timeout = inner
                    .last_failure_time
                    .map(|at| at.elapsed() > self.config.recovery_timeout)
                    .unwrap_or(true);

                if elapsed_past_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(service = %self.config.service_name, "Circuit breaker half-open, allowing trial call");
                    Ok(Permit::Trial)
                } else {
                    debug!(service = %self.config.service_name, "Circuit breaker is open, rejecting call");
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(service = %self.config.service_name, "Trial call in flight, rejecting call");
                    Err(self.open_error())
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();

        match (permit, inner.state) {
            (Permit::Trial, CircuitState::HalfOpen) => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                info!(service = %self.config.service_name, "Circuit breaker closed after successful trial");
            }
            (Permit::Normal { generation }, CircuitState::Closed)
                if generation == inner.generation =>
            {
                inner.consecutive_failures = 0;
            }
            _ => debug!(service = %self.config.service_name, "Ignoring outcome of a stale call"),
        }
    }

    fn record_failure(&self, permit: Permit) {
        let mut inner = self.lock();

        match (permit, inner.state) {
            (Permit::Trial, CircuitState::HalfOpen) => {
                self.trip(&mut inner);
                warn!(service = %self.config.service_name, "Circuit breaker reopened after failed trial");
            }
            (Permit::Normal { generation }, CircuitState::Closed)
                if generation == inner.generation =>
            {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());

                debug!(
                    service = %self.config.service_name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    self.trip(&mut inner);
                    warn!(
                        service = %self.config.service_name,
                        failures,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            _ => debug!(service = %self.config.service_name, "Ignoring outcome of a stale call"),
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.consecutive_failures = 0;
        inner.last_failure_time = Some(Instant::now());
        inner.trial_in_flight = false;
        inner.generation += 1;
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            self.trip(&mut inner);
            warn!(service = %self.config.service_name, "Trial call cancelled, circuit breaker reopened");
        }
    }

    fn open_error(&self) -> NotificationError {
        NotificationError::CircuitOpen {
            service: self.config.service_name.clone(),
        }
    }
}

/// Reopens the breaker if a trial call's future is dropped before it resolves.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
