/// Circuit Breaker implementation with consecutive-failure tracking
///
/// State transitions:
/// - Closed → Open: when consecutive failures reach the threshold
/// - Open → HalfOpen: on the first call after the cooldown elapsed
/// - HalfOpen → Closed: when the single trial call succeeds
/// - HalfOpen → Open: when the trial call fails (cooldown restarts)
///
/// The breaker sees one verdict per `call`. When the call wraps a retry policy,
/// failures are counted in units of fully-retried operations, not raw attempts.
use crate::metrics::CircuitBreakerMetrics;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Testing if the dependency recovered, one trial request allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count to trigger circuit open
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

type OpenObserver = Arc<dyn Fn(&str) + Send + Sync>;
type ResetObserver = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
    on_open: Option<OpenObserver>,
    on_reset: Option<ResetObserver>,
}

struct CircuitBreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open - failing fast")]
    Open,
    #[error("Call failed: {0}")]
    CallFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open => None,
            CircuitBreakerError::CallFailed(e) => Some(e),
        }
    }
}

enum Verdict {
    Success,
    Failure(String),
}

/// Records a failure if the admitted call is dropped before it reports a verdict
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, verdict: Verdict) {
        self.settled = true;
        self.breaker.record(verdict);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker
                .record(Verdict::Failure("call abandoned before completion".to_string()));
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
            on_open: None,
            on_reset: None,
        }
    }

    /// Observer invoked with the failure reason whenever the circuit opens
    pub fn with_on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Observer invoked when a HalfOpen trial closes the circuit
    pub fn with_on_reset<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(f));
        self
    }

    /// Execute a future with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        // Fast path: check if circuit is open
        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                CircuitBreakerMetrics::record_call(CircuitState::Open.as_str(), "rejected");
                return Err(CircuitBreakerError::Open);
            }
        };

        match f().await {
            Ok(result) => {
                admission.settle(Verdict::Success);
                Ok(result)
            }
            Err(e) => {
                admission.settle(Verdict::Failure(e.to_string()));
                Err(CircuitBreakerError::CallFailed(e))
            }
        }
    }

    fn admit(&self) -> Option<Admission<'_>> {
        let mut state = self.state.lock();

        match state.current {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .map_or(true, |opened_at| opened_at.elapsed() >= self.config.cooldown);
                if !cooled_down {
                    return None;
                }

                info!("Circuit breaker: Open → HalfOpen");
                CircuitBreakerMetrics::record_state_transition("open", "half_open");
                if let Some(opened_at) = state.opened_at {
                    CircuitBreakerMetrics::record_open_duration(
                        opened_at.elapsed().as_secs_f64(),
                    );
                }
                state.current = CircuitState::HalfOpen;
                state.trial_in_flight = true;
            }
            CircuitState::HalfOpen => {
                // Only one trial call at a time
                if state.trial_in_flight {
                    return None;
                }
                state.trial_in_flight = true;
            }
        }

        Some(Admission {
            breaker: self,
            settled: false,
        })
    }

    fn record(&self, verdict: Verdict) {
        // Observers run after the lock is released
        let mut opened_reason = None;
        let mut reset = false;

        {
            let mut state = self.state.lock();
            let from = state.current;

            match verdict {
                Verdict::Success => {
                    state.consecutive_failures = 0;
                    if from == CircuitState::HalfOpen {
                        info!("Circuit breaker: HalfOpen → Closed");
                        CircuitBreakerMetrics::record_state_transition("half_open", "closed");
                        state.current = CircuitState::Closed;
                        state.opened_at = None;
                        state.trial_in_flight = false;
                        reset = true;
                    }
                    CircuitBreakerMetrics::record_call(from.as_str(), "success");
                }
                Verdict::Failure(reason) => {
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    CircuitBreakerMetrics::record_call(from.as_str(), "failure");

                    match from {
                        CircuitState::Closed => {
                            if state.consecutive_failures >= self.config.failure_threshold {
                                warn!(
                                    failures = state.consecutive_failures,
                                    reason = %reason,
                                    "Circuit breaker: Closed → Open"
                                );
                                CircuitBreakerMetrics::record_state_transition("closed", "open");
                                state.current = CircuitState::Open;
                                state.opened_at = Some(Instant::now());
                                opened_reason = Some(reason);
                            }
                        }
                        CircuitState::HalfOpen => {
                            warn!(reason = %reason, "Circuit breaker: HalfOpen → Open (trial failed)");
                            CircuitBreakerMetrics::record_state_transition("half_open", "open");
                            state.current = CircuitState::Open;
                            state.opened_at = Some(Instant::now());
                            state.trial_in_flight = false;
                            opened_reason = Some(reason);
                        }
                        CircuitState::Open => {
                            // A call admitted before another caller tripped the circuit
                        }
                    }
                }
            }
        }

        if let (Some(reason), Some(on_open)) = (opened_reason, &self.on_open) {
            on_open(&reason);
        }
        if reset {
            if let Some(on_reset) = &self.on_reset {
                on_reset();
            }
        }
    }

    /// Get current circuit state (for monitoring)
    pub fn state(&self) -> CircuitState {
        self.state.lock().current
    }

    /// Get current consecutive failure count (for monitoring)
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &state.current)
            .field("consecutive_failures", &state.consecutive_failures)
            .finish()
    }
}
