//! Automatic failure isolation for LLM calls
//!
//! Tracks consecutive failures and opens the circuit when the threshold is
//! reached. After a recovery timeout, a single probe request is admitted
//! (half-open); its outcome closes or reopens the circuit. While half-open,
//! at most one probe is in flight across all concurrent callers.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::policy::RuntimePolicy;
use crate::types::{ContainmentError, ContainmentResult, PolicyContext, PolicyDecision};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation. Requests flow through.
    Closed,
    /// Failure threshold reached. Requests are immediately rejected.
    Open,
    /// Recovery testing. Exactly one probe request is allowed through.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    bound_chain: Option<String>,
}

/// Circuit breaker for provider failure isolation.
///
/// All transitions happen under one lock, so `check` and `record_*` are
/// linearisable. An instance may be bound to at most one chain; the
/// containment layer enforces single-owner binding through `bind`.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                probe_in_flight: false,
                bound_chain: None,
            }),
        }
    }

    /// Bind this breaker to one chain. Rebinding to a different chain id
    /// fails; primitives owned by a context must not be shared.
    pub fn bind(&self, chain_id: &str) -> ContainmentResult<()> {
        let mut inner = self.inner.lock();
        match &inner.bound_chain {
            Some(bound) if bound != chain_id => Err(ContainmentError::InvalidState(format!(
                "circuit breaker already bound to chain '{}', cannot rebind to '{}'",
                bound, chain_id
            ))),
            _ => {
                inner.bound_chain = Some(chain_id.to_string());
                Ok(())
            }
        }
    }

    /// Current state, applying the OPEN to HALF_OPEN transition when the
    /// recovery timeout has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        Self::maybe_half_open(&mut inner, self.recovery_timeout);
        inner.state
    }

    /// Record a successful operation. Closes the circuit from half-open and
    /// resets the consecutive failure counter. Returns the new state.
    pub fn record_success(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                tracing::info!("circuit closed after successful probe");
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {
                // Late success from a call dispatched before the trip.
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
            }
        }
        inner.state
    }

    /// Record a failed operation. Opens the circuit at the threshold, and
    /// reopens it from half-open. Returns the new state.
    pub fn record_failure(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!("circuit reopened after failed probe");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        consecutive_failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            BreakerState::Open => {
                inner.failure_count += 1;
            }
        }
        inner.state
    }

    /// Consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Total success count.
    pub fn success_count(&self) -> u64 {
        self.inner.lock().success_count
    }

    fn maybe_half_open(inner: &mut BreakerInner, recovery_timeout: Duration) {
        if inner.state == BreakerState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = false;
                    tracing::info!("circuit half-open, admitting one probe");
                }
            }
        }
    }
}

impl RuntimePolicy for CircuitBreaker {
    /// Allows in CLOSED; denies in OPEN; in HALF_OPEN admits exactly one
    /// in-flight probe across all concurrent callers. The probe slot is
    /// released only by `record_success` or `record_failure`.
    fn check(&self, _context: &PolicyContext) -> PolicyDecision {
        let mut inner = self.inner.lock();
        Self::maybe_half_open(&mut inner, self.recovery_timeout);

        match inner.state {
            BreakerState::Closed => PolicyDecision::allow(self.policy_type()),
            BreakerState::Open => PolicyDecision::deny(
                self.policy_type(),
                format!("Circuit OPEN: {} consecutive failures", inner.failure_count),
            ),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    PolicyDecision::deny(
                        self.policy_type(),
                        "Circuit HALF_OPEN: probe already in flight",
                    )
                } else {
                    inner.probe_in_flight = true;
                    PolicyDecision::allow(self.policy_type())
                }
            }
        }
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    fn policy_type(&self) -> &'static str {
        "circuit_breaker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_closed_and_allows() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check(&PolicyContext::new()).allowed);
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(breaker.record_failure(), BreakerState::Closed);
        assert_eq!(breaker.record_failure(), BreakerState::Closed);
        assert_eq!(breaker.record_failure(), BreakerState::Open);

        let decision = breaker.check(&PolicyContext::new());
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Circuit OPEN"));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.check(&PolicyContext::new()).allowed);

        assert_eq!(breaker.record_success(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.check(&PolicyContext::new()).allowed);
        assert_eq!(breaker.record_failure(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let first = breaker.check(&PolicyContext::new());
        assert!(first.allowed);
        let second = breaker.check(&PolicyContext::new());
        assert!(!second.allowed);
        assert!(second.reason.contains("already in flight"));

        // Recording an outcome releases the probe slot.
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(1));
        assert!(breaker.check(&PolicyContext::new()).allowed);
    }

    #[test]
    fn test_half_open_single_flight_under_concurrency() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(0)));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || breaker.check(&PolicyContext::new()))
            })
            .collect();
        let decisions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let allowed = decisions.iter().filter(|d| d.allowed).count();
        assert_eq!(allowed, 1);
        for denied in decisions.iter().filter(|d| !d.allowed) {
            assert!(denied.reason.contains("already in flight"));
        }
    }

    #[test]
    fn test_bind_rejects_second_chain() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.bind("chain-a").unwrap();
        breaker.bind("chain-a").unwrap();
        let err = breaker.bind("chain-b").unwrap_err();
        assert!(matches!(err, ContainmentError::InvalidState(_)));
    }

    #[test]
    fn test_reset_returns_to_closed() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
