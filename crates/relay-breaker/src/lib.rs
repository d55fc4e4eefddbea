//! Per-endpoint circuit breaker: closed/open/half-open state machine plus a
//! registry keyed by endpoint string, adapted from a per-engine breaker to
//! the relay's per-endpoint failure isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

type StateChangeCallback = dyn Fn(CircuitState, CircuitState) + Send + Sync;

/// Three-state circuit breaker for a single endpoint.
///
/// Closed -> Open when `failures >= failure_threshold`. Open -> HalfOpen
/// lazily, observed on `state()`, once `open_timeout` has elapsed since the
/// last failure. HalfOpen -> Closed after `success_threshold` consecutive
/// successes; any failure while half-open reopens the circuit.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    half_open_successes: AtomicU32,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
    closed_since: RwLock<Instant>,
    on_state_change: Option<Arc<StateChangeCallback>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &*self.state.read())
            .field("failure_count", &self.failure_count.load(Ordering::SeqCst))
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            failure_threshold,
            success_threshold,
            open_timeout,
            last_failure: RwLock::new(None),
            closed_since: RwLock::new(Instant::now()),
            on_state_change: None,
        }
    }

    pub fn with_callback(
        mut self,
        callback: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    fn transition_to(&self, new_state: CircuitState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        if new_state == CircuitState::Closed {
            *self.closed_since.write() = Instant::now();
        }
        if old_state != new_state {
            // Invoked off the critical section: the state lock above is
            // already released by the time this runs.
            if let Some(cb) = &self.on_state_change {
                cb(old_state, new_state);
            }
        }
    }

    /// Lazily observes the Open -> HalfOpen transition, then returns the
    /// current state.
    pub fn state(&self) -> CircuitState {
        self.check_open_timeout();
        *self.state.read()
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    fn check_open_timeout(&self) {
        let state = *self.state.read();
        if state != CircuitState::Open {
            return;
        }
        let elapsed_ok = self
            .last_failure
            .read()
            .is_some_and(|t| t.elapsed() >= self.open_timeout);
        if elapsed_ok {
            self.half_open_successes.store(0, Ordering::SeqCst);
            self.transition_to(CircuitState::HalfOpen);
            debug!("circuit breaker transitioned to half-open");
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.success_threshold {
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    self.transition_to(CircuitState::Closed);
                    info!("circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        *self.last_failure.write() = Some(Instant::now());
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    self.transition_to(CircuitState::Open);
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_successes.store(0, Ordering::SeqCst);
                self.transition_to(CircuitState::Open);
                warn!("circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.half_open_successes.store(0, Ordering::SeqCst);
        *self.last_failure.write() = None;
        self.transition_to(CircuitState::Closed);
    }
}

/// Registry of circuit breakers keyed by endpoint. Breakers are created
/// lazily on first lookup, all sharing the registry's thresholds.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            failure_threshold,
            success_threshold,
            open_timeout,
        }
    }

    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(endpoint) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.failure_threshold,
                    self.success_threshold,
                    self.open_timeout,
                ))
            })
            .clone()
    }

    pub fn is_allowed(&self, endpoint: &str) -> bool {
        self.get(endpoint).is_allowed()
    }

    pub fn record_success(&self, endpoint: &str) {
        self.get(endpoint).record_success();
    }

    pub fn record_failure(&self, endpoint: &str) {
        self.get(endpoint).record_failure();
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    /// Drop entries that have been `Closed` for at least `idle` without
    /// having ever failed since. Bounds registry growth for long-tail
    /// endpoints that never reappear.
    pub fn cleanup_long_closed(&self, idle: Duration) {
        self.breakers.write().retain(|_, breaker| {
            breaker.state() != CircuitState::Closed
                || breaker.closed_since.read().elapsed() < idle
        });
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_circuit_breaker_opens_then_half_opens_then_closes() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(50));
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_allowed());

        sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(10));
        breaker.record_failure();
        sleep(Duration::from_millis(15));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_state_monotonic_within_request_scenario_five() {
        // End-to-end scenario 5: failure_threshold=1, success_threshold=2, timeout=50ms
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(50));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_isolates_by_endpoint() {
        let registry = CircuitBreakerRegistry::new(1, 2, Duration::from_secs(60));
        registry.record_failure("host-a");
        assert!(!registry.is_allowed("host-a"));
        assert!(registry.is_allowed("host-b"));
    }

    #[test]
    fn test_registry_reset_all() {
        let registry = CircuitBreakerRegistry::new(1, 2, Duration::from_secs(60));
        registry.record_failure("host-a");
        registry.record_failure("host-b");
        assert!(!registry.is_allowed("host-a"));
        registry.reset_all();
        assert!(registry.is_allowed("host-a"));
        assert!(registry.is_allowed("host-b"));
    }

    #[test]
    fn test_registry_cleanup_long_closed() {
        let registry = CircuitBreakerRegistry::new(1, 2, Duration::from_secs(60));
        registry.get("host-a"); // never failed, closed since creation
        assert_eq!(registry.len(), 1);
        sleep(Duration::from_millis(20));
        registry.cleanup_long_closed(Duration::from_millis(10));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_callback_invoked_on_transition() {
        use std::sync::atomic::AtomicUsize;
        let transitions = Arc::new(AtomicUsize::new(0));
        let transitions_clone = transitions.clone();
        let breaker = CircuitBreaker::new(1, 1, Duration::from_millis(10)).with_callback(
            move |_from, _to| {
                transitions_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        breaker.record_failure();
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }
}
