//! Reconnection backoff policy
//!
//! Exponential delay with uniform jitter, capped per attempt and bounded in
//! attempt count. The attempt counter is independent of the circuit breaker.

use std::time::Duration;

use rand::Rng;

use voice_bridge_config::ReconnectConfig;

#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts consumed since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    ///
    /// delay = min(initial * multiplier^attempt, max) + uniform(-jitter, +jitter),
    /// clamped to zero.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let exponential =
            self.config.initial_delay_ms as f64 * self.config.multiplier.powi(self.attempt as i32);
        let base = exponential.min(self.config.max_delay_ms as f64) as i64;

        let jitter = if self.config.jitter_ms > 0 {
            let bound = self.config.jitter_ms as i64;
            rand::thread_rng().gen_range(-bound..=bound)
        } else {
            0
        };

        self.attempt += 1;
        Some(Duration::from_millis((base + jitter).max(0) as u64))
    }

    /// Reset the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: u64, multiplier: f64, max: u64, jitter: u64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: initial,
            multiplier,
            max_delay_ms: max,
            jitter_ms: jitter,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let mut policy = ReconnectPolicy::new(config(100, 2.0, 10_000, 0, 5));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut policy = ReconnectPolicy::new(config(1000, 10.0, 3000, 0, 10));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
    }

    #[test]
    fn test_exhaustion_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(10, 2.0, 1000, 0, 3));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempt(), 3);
    }

    #[test]
    fn test_jitter_stays_within_bounds_and_non_negative() {
        let mut policy = ReconnectPolicy::new(config(100, 2.0, 10_000, 500, 100));
        for _ in 0..50 {
            let delay = policy.next_delay().unwrap().as_millis() as i64;
            // base is in [100, 10000], jitter in [-500, 500]
            assert!(delay <= 10_500);
            assert!(delay >= 0);
        }
    }

    #[test]
    fn test_reset_restarts_the_schedule() {
        let mut policy = ReconnectPolicy::new(config(100, 2.0, 10_000, 0, 2));
        policy.next_delay();
        policy.next_delay();
        assert!(policy.next_delay().is_none());
        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }
}
