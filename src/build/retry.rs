//! Step retry policy

use crate::config::schema::RetryConfig;
use crate::error::ErrorKind;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub command_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
            command_attempts: config.command_attempts.max(1),
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            command_attempts: 1,
        }
    }

    /// Total attempts allowed for an error kind, the first one included
    pub fn attempts_for(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::TransientFailure => self.max_attempts,
            ErrorKind::CommandFailure => self.command_attempts,
            _ => 1,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn attempts_by_kind() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts_for(ErrorKind::TransientFailure), 4);
        assert_eq!(policy.attempts_for(ErrorKind::CommandFailure), 1);
        assert_eq!(policy.attempts_for(ErrorKind::ChecksumOrVersionMismatch), 1);
        assert_eq!(policy.attempts_for(ErrorKind::InvalidSpec), 1);
    }

    #[test]
    fn config_floors() {
        let config = RetryConfig {
            max_attempts: 0,
            command_attempts: 0,
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.command_attempts, 1);
        assert_eq!(policy.delay(3), policy.initial_delay);
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.attempts_for(ErrorKind::TransientFailure), 1);
        assert_eq!(policy.delay(1), Duration::ZERO);
    }
}
