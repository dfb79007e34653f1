//! Circuit breaker.
//!
//! Opens after K consecutive failures; half-opens after T seconds,
//! allowing M trial calls; closes on the first success in half-open,
//! else re-opens. State is per (provider, operation-kind) pair unless
//! configured globally.
//!
//! A discrete closed/open/half-open state machine driven by consecutive
//! failure counts instead of a continuous score.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_calls_made: u32,
}

/// A single circuit breaker, scoped by the caller to one
/// (provider, operation-kind) pair (or globally, caller's choice).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_calls_made: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.inner.lock().state
    }

    fn maybe_transition_to_half_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.recovery_timeout
        {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls_made = 0;
        }
    }

    /// Call before attempting the operation. Returns `false` (and does
    /// not mutate state) when the circuit is open and should reject the
    /// call without even invoking the provider (spec §8 boundary
    /// behavior: "Circuit open ⇒ Execute returns CircuitOpen without
    /// invoking the provider").
    pub fn allow_call(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.maybe_transition_to_half_open();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls_made < self.config.half_open_max_calls {
                    inner.half_open_calls_made += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns `true` if this call closed a circuit that was Open or
    /// HalfOpen (useful for emitting a one-shot recovery
    /// `ProviderHealthChanged` event).
    pub fn record_success(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let mut inner = self.inner.lock();
        let was_open = inner.state != CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.half_open_calls_made = 0;
        was_open
    }

    /// Returns `true` if this call caused the circuit to transition to
    /// Open (useful for emitting a one-shot `ProviderHealthChanged`
    /// event).
    pub fn record_failure(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                true
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_calls: 1,
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(fast_config());
        assert!(cb.allow_call());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        let opened = cb.record_failure();
        assert!(opened);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn half_opens_after_recovery_timeout_then_closes_on_success() {
        let cb = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_call());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.allow_call();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn disabled_circuit_always_allows() {
        let mut config = fast_config();
        config.enabled = false;
        let cb = CircuitBreaker::new(config);
        for _ in 0..10 {
            cb.record_failure();
        }
        assert!(cb.allow_call());
    }
}
