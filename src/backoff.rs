//! Exponential backoff policy for registration retries
//!
//! Failed registrations are retried with an exponential, capped, optionally
//! jittered delay. The jitter spreads reconnect attempts across accounts so a
//! connectivity flap does not produce a thundering herd of REGISTER requests
//! against the same registrar.

use std::time::Duration;

/// Configuration for backoff behavior
///
/// # Examples
///
/// ```rust
/// use sipkeep::backoff::BackoffConfig;
/// use std::time::Duration;
///
/// let config = BackoffConfig::default();
/// assert_eq!(config.initial_delay, Duration::from_secs(1));
/// assert_eq!(config.max_delay, Duration::from_secs(30));
///
/// // Delays grow strictly until the cap, then stay there.
/// let d1 = config.delay_for_attempt(1);
/// let d2 = config.delay_for_attempt(2);
/// assert!(d2 > d1);
/// assert!(config.delay_for_attempt(20) <= config.max_delay);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any retry delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub multiplier: f64,
    /// Whether to add ±10% jitter to each delay
    pub use_jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Base delay for the given 1-based attempt number, capped, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Delay for the given attempt with jitter applied when configured.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if !self.use_jitter {
            return base;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2; // ±10% jitter
        let millis = base.as_millis() as f64 * (1.0 + jitter);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_increase_strictly_until_cap() {
        let config = BackoffConfig {
            use_jitter: false,
            ..Default::default()
        };
        let mut previous = Duration::ZERO;
        let mut capped = false;
        for attempt in 1..=10 {
            let delay = config.delay_for_attempt(attempt);
            if delay == config.max_delay {
                capped = true;
                break;
            }
            assert!(delay > previous, "attempt {attempt} did not grow");
            previous = delay;
        }
        assert!(capped, "backoff never reached the cap");
    }

    #[test]
    fn cap_holds_for_large_attempts() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for_attempt(1000), config.max_delay);
        // Overflow-prone exponents must not panic or wrap.
        assert_eq!(config.delay_for_attempt(u32::MAX), config.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig::default();
        for _ in 0..100 {
            let delay = config.jittered_delay_for_attempt(3);
            let base = config.delay_for_attempt(3);
            let low = base.mul_f64(0.89);
            assert!(delay >= low && delay <= config.max_delay, "jittered {delay:?} out of range");
        }
    }
}
