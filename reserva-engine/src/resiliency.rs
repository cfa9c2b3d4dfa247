use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use reserva_core::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Trips open after a run of failures and fails fast until the reset
/// timeout has elapsed, then lets a single probe through.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            reset_timeout,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may proceed right now.
    pub async fn allow(&self) -> bool {
        let current = *self.state.read().await;
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = *self.opened_at.read().await;
                let cooled_down = opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    *self.state.write().await = CircuitState::HalfOpen;
                    info!(circuit = %self.name, "circuit moving to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            info!(circuit = %self.name, "circuit recovered, closing");
        }
        *state = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
    }

    pub async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen || failures >= self.failure_threshold {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Instant::now());
            error!(circuit = %self.name, failures, "circuit tripped open");
        }
    }
}

/// Bounded retry with exponential backoff, jitter and a per-attempt
/// timeout. Only transport-level (retryable) failures are re-attempted;
/// explicit declines pass straight through.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub async fn execute<T, F, Fut>(
        &self,
        circuit: &CircuitBreaker,
        operation: F,
    ) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        if !circuit.allow().await {
            return Err(EngineError::Payment {
                message: "payment provider temporarily unavailable (circuit open)".to_string(),
                retryable: true,
            });
        }

        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
                if !circuit.allow().await {
                    break;
                }
            }

            match tokio::time::timeout(self.call_timeout, operation()).await {
                Ok(Ok(value)) => {
                    circuit.record_success().await;
                    return Ok(value);
                }
                Ok(Err(err)) if err.is_retryable() => {
                    circuit.record_failure().await;
                    warn!(attempt, error = %err, "retryable gateway failure");
                    last_error = Some(err);
                }
                Ok(Err(err)) => {
                    // Explicit declines are not an infrastructure signal.
                    return Err(err);
                }
                Err(_elapsed) => {
                    circuit.record_failure().await;
                    warn!(attempt, "gateway call timed out");
                    last_error = Some(EngineError::Payment {
                        message: format!("gateway call timed out after {:?}", self.call_timeout),
                        retryable: true,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::Payment {
            message: "payment attempts exhausted".to_string(),
            retryable: true,
        }))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ceiling = (capped.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        capped + Duration::from_millis(jitter)
    }
}
