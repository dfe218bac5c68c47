//! Configuration for the session coordinator
//!
//! All timing knobs live here. The push deadline and backoff cap defaults are
//! deliberately conservative starting points meant to be tuned per deployment.

use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Configuration for a [`crate::coordinator::SessionCoordinator`]
///
/// # Examples
///
/// ```rust
/// use sipkeep::config::CoordinatorConfig;
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::new()
///     .with_push_deadline(Duration::from_secs(20))
///     .with_connectivity_debounce(Duration::from_millis(500));
///
/// assert_eq!(config.push_deadline, Duration::from_secs(20));
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Default deadline for a push-announced call when the push carries no hint
    pub push_deadline: Duration,

    /// How often the push wake queue is swept for expired entries
    ///
    /// Deadlines are wall-clock based and tolerate coarse resolution; entries
    /// are dropped at most one sweep interval after their deadline.
    pub expiry_sweep_interval: Duration,

    /// Window within which repeated identical connectivity classifications
    /// are dropped
    pub connectivity_debounce: Duration,

    /// Backoff policy for registration retries
    pub backoff: BackoffConfig,

    /// User agent string reported alongside events, for logging only
    pub user_agent: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            push_deadline: Duration::from_secs(30),
            expiry_sweep_interval: Duration::from_secs(1),
            connectivity_debounce: Duration::from_millis(300),
            backoff: BackoffConfig::default(),
            user_agent: format!("sipkeep/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default push wake deadline
    pub fn with_push_deadline(mut self, deadline: Duration) -> Self {
        self.push_deadline = deadline;
        self
    }

    /// Set the push expiry sweep interval
    pub fn with_expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = interval;
        self
    }

    /// Set the connectivity debounce window
    pub fn with_connectivity_debounce(mut self, window: Duration) -> Self {
        self.connectivity_debounce = window;
        self
    }

    /// Set the registration retry backoff policy
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.push_deadline.is_zero() {
            return Err(CoordinatorError::InvalidConfiguration {
                field: "push_deadline".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.expiry_sweep_interval.is_zero() {
            return Err(CoordinatorError::InvalidConfiguration {
                field: "expiry_sweep_interval".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(CoordinatorError::InvalidConfiguration {
                field: "backoff.max_delay".to_string(),
                reason: "must be at least backoff.initial_delay".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CoordinatorConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_deadline_rejected() {
        let config = CoordinatorConfig::new().with_push_deadline(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidConfiguration { .. }));
    }

    #[test]
    fn inverted_backoff_rejected() {
        let mut config = CoordinatorConfig::new();
        config.backoff.max_delay = Duration::from_millis(1);
        assert!(config.validate().is_err());
    }
}
