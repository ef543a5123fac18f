//! Budget-aware retry wrapper with exponential backoff

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::policy::RuntimePolicy;
use crate::types::{ContainmentError, ContainmentResult, PolicyContext, PolicyDecision};

#[derive(Debug, Default)]
struct RetryState {
    attempt_count: u32,
    total_retries: u64,
    last_error: Option<String>,
}

/// Retry wrapper enforcing a total retry budget across a request chain.
///
/// Unlike per-call retry limits, the cumulative counter prevents 3 retries
/// times 5 nested calls turning into 15 provider calls from one user
/// action. Backoff for attempt `i` is `min(base * 2^i, max)` scaled by a
/// random jitter factor so concurrent retriers do not stampede together.
#[derive(Debug)]
pub struct RetryContainer {
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    jitter: f64,
    state: Mutex<RetryState>,
    // Serialises execute(); two callers cannot interleave attempts.
    execute_lock: Mutex<()>,
}

impl RetryContainer {
    pub fn new(max_retries: u32) -> Self {
        Self::with_backoff(max_retries, Duration::from_secs(1), Duration::from_secs(30))
            .expect("default backoff is valid")
    }

    pub fn with_backoff(
        max_retries: u32,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> ContainmentResult<Self> {
        if backoff_base > backoff_max {
            return Err(ContainmentError::InvalidArgument(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                backoff_base, backoff_max
            )));
        }
        Ok(Self {
            max_retries,
            backoff_base,
            backoff_max,
            jitter: 0.1,
            state: Mutex::new(RetryState::default()),
            execute_lock: Mutex::new(()),
        })
    }

    /// Override the jitter fraction. Zero disables jitter (tests only; the
    /// non-zero default prevents thundering herds).
    pub fn with_jitter(mut self, jitter: f64) -> ContainmentResult<Self> {
        if !(0.0..1.0).contains(&jitter) {
            return Err(ContainmentError::InvalidArgument(format!(
                "jitter must be in [0, 1), got {}",
                jitter
            )));
        }
        self.jitter = jitter;
        Ok(self)
    }

    /// Execute `f` with retry containment. Returns the first success, or
    /// the final error once the retry budget is exhausted.
    pub fn execute<T>(&self, mut f: impl FnMut() -> anyhow::Result<T>) -> anyhow::Result<T> {
        let _serial = self.execute_lock.lock();
        self.state.lock().attempt_count = 0;

        let mut attempt = 0u32;
        loop {
            self.state.lock().attempt_count = attempt + 1;
            match f() {
                Ok(value) => {
                    self.state.lock().last_error = None;
                    if attempt > 0 {
                        tracing::info!(attempt = attempt + 1, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    {
                        let mut state = self.state.lock();
                        state.last_error = Some(err.to_string());
                        state.total_retries += 1;
                    }
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            max_retries = self.max_retries,
                            error = %err,
                            "all retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::info!(
                        attempt = attempt + 1,
                        remaining = self.max_retries - attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retry scheduled"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..1.0 + self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Number of attempts in the last `execute` call.
    pub fn attempt_count(&self) -> u32 {
        self.state.lock().attempt_count
    }

    /// Total retries across all `execute` calls.
    pub fn total_retries(&self) -> u64 {
        self.state.lock().total_retries
    }

    /// Last error message, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl RuntimePolicy for RetryContainer {
    /// Denies while the container is in an error state (the last execution
    /// failed after exhausting all retries). Does not modify retry state.
    fn check(&self, _context: &PolicyContext) -> PolicyDecision {
        let state = self.state.lock();
        if state.last_error.is_some() {
            return PolicyDecision::deny(
                self.policy_type(),
                format!("Retry budget exhausted ({} retries used)", state.total_retries),
            );
        }
        PolicyDecision::allow(self.policy_type())
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.attempt_count = 0;
        state.total_retries = 0;
        state.last_error = None;
    }

    fn policy_type(&self) -> &'static str {
        "retry_budget"
    }
}
