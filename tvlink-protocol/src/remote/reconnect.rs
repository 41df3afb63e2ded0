//! Reconnect backoff for a standalone remote session

use std::time::Duration;

/// Default initial reconnect delay
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Default reconnect delay ceiling
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Default number of reconnect attempts before giving up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Exponential backoff with a bounded number of attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts made since the last successful connect
    pub attempts: u32,
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub base: Duration,
    /// Maximum delay between attempts
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_BASE,
            DEFAULT_RECONNECT_CAP,
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base,
            cap,
        }
    }

    /// Reset after a successful connect
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Check if more attempts are available
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt, or `None` once exhausted
    ///
    /// `min(base * 2^attempts, cap)`, then counts the attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }
        let delay = backoff(self.base, self.cap, self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        format!("Attempt {}/{}", self.attempts, self.max_attempts)
    }
}

/// `min(base * 2^exponent, cap)` without overflow
pub fn backoff(base: Duration, cap: Duration, exponent: u32) -> Duration {
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let mut policy = ReconnectPolicy::default();
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
        assert!(!policy.has_attempts_remaining());
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_never_overflows() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff(Duration::from_secs(1), cap, 40), cap);
        assert_eq!(backoff(Duration::from_secs(u64::MAX / 2), cap, 3), cap);
        assert_eq!(backoff(Duration::from_millis(250), cap, 2), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_disables_reconnect() {
        let mut policy = ReconnectPolicy::new(DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_CAP, 0);
        assert_eq!(policy.next_delay(), None);
    }
}
