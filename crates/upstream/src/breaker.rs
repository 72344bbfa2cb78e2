//! Circuit breaker over upstream connection attempts
//!
//! Closed admits attempts freely. Repeated failures open the breaker, which
//! refuses attempts until the reset timeout elapses; the first attempt after
//! that runs as a half-open trial whose outcome decides the next state.

use std::time::{Duration, Instant};

use voice_bridge_config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Whether a connection attempt may proceed right now.
    ///
    /// Open transitions to HalfOpen once the reset timeout has elapsed and
    /// admits exactly one trial; further calls refuse until the trial's
    /// outcome is recorded.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled_down = self
                    .last_failure
                    .map(|at| at.elapsed() >= Duration::from_millis(self.config.reset_timeout_ms))
                    .unwrap_or(true);
                if cooled_down {
                    tracing::debug!("circuit breaker half-open, admitting trial connection");
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// A connection reached the established state.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("circuit breaker closed after successful connection");
        }
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.last_failure = None;
    }

    /// A connection attempt failed or an established connection dropped.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());
        if self.state == BreakerState::HalfOpen || self.failures >= self.config.failure_threshold {
            if self.state != BreakerState::Open {
                tracing::warn!(failures = self.failures, "circuit breaker opened");
            }
            self.state = BreakerState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        }
    }

    #[test]
    fn test_closed_admits_attempts() {
        let mut breaker = CircuitBreaker::new(config(3, 1000));
        assert!(breaker.can_attempt());
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(config(3, 60_000));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_attempt());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let mut breaker = CircuitBreaker::new(config(1, 20));
        breaker.record_failure();
        assert!(!breaker.can_attempt());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // The trial is in flight; no second attempt until its outcome lands.
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(config(1, 20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_attempt());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_success_resets_to_closed() {
        let mut breaker = CircuitBreaker::new(config(2, 20));
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_attempt());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.can_attempt());
    }
}
