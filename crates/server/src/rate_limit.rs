//! Per-session rate limiting
//!
//! Fixed-window counter over inbound messages. One limiter per session,
//! owned by the session's event loop; nothing is shared across sessions.
//! The limiter only counts — closing the offending connection is the
//! caller's decision.

use std::time::{Duration, Instant};

use thiserror::Error;
use voice_bridge_config::RateLimitConfig;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("message rate limit exceeded: {max} messages per {window_ms}ms")]
    MessageRate { max: u32, window_ms: u64 },
}

#[derive(Debug)]
pub struct RateLimiter {
    max_messages: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            window: Duration::from_millis(config.window_ms),
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Account for one inbound message.
    ///
    /// The window rolls over on the first call after it has elapsed.
    /// Rejection has no side effect beyond not counting the message.
    pub fn check_message(&mut self) -> Result<(), RateLimitError> {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }

        if self.count >= self.max_messages {
            return Err(RateLimitError::MessageRate {
                max: self.max_messages,
                window_ms: self.window.as_millis() as u64,
            });
        }

        self.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_messages: u32, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_messages,
            window_ms,
        }
    }

    #[test]
    fn test_allows_exactly_max_messages_per_window() {
        let mut limiter = RateLimiter::new(&config(5, 60_000));
        for _ in 0..5 {
            assert!(limiter.check_message().is_ok());
        }
        assert!(limiter.check_message().is_err());
        // Still rejected; rejection does not consume budget.
        assert!(limiter.check_message().is_err());
    }

    #[test]
    fn test_window_rollover_resets_the_count() {
        let mut limiter = RateLimiter::new(&config(2, 30));
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_err());

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_err());
    }
}
