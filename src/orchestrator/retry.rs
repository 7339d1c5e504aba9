//! Delivery retry policy: bounded exponential backoff with optional jitter

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Multiplier applied for each further retry
    pub backoff_factor: f64,
    /// Upper bound on any single delay in milliseconds
    pub max_delay_ms: u64,
    /// Spread delays by up to ±25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 2_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(i32::MAX as u32) as i32;
        let delay_ms = (self.base_delay_ms as f64 * self.backoff_factor.powi(exponent))
            .min(self.max_delay_ms as f64) as u64;

        let delay_ms = if self.jitter {
            let spread = delay_ms / 4;
            if spread > 0 {
                let offset = jitter_seed() % (spread * 2 + 1);
                (delay_ms + offset).saturating_sub(spread).min(self.max_delay_ms)
            } else {
                delay_ms
            }
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Backoff for `retry`, stretched to a server hint but never past `max_delay_ms`
    pub fn delay_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let ceiling = Duration::from_millis(self.max_delay_ms);
        self.delay_for(retry).max(hint.unwrap_or_default()).min(ceiling)
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// xorshift64 over a process-wide state seeded from the clock
fn jitter_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static STATE: AtomicU64 = AtomicU64::new(0);

    let mut x = STATE.load(Ordering::Relaxed);
    if x == 0 {
        x = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15)
            | 1;
    }
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    STATE.store(x, Ordering::Relaxed);
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_delays() {
        let policy = fixed();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = fixed();
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_for(2).as_millis() as u64;
            assert!((3_000..=5_000).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_server_hint_is_capped() {
        let policy = fixed();
        assert_eq!(policy.delay_with_hint(1, None), Duration::from_secs(2));
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.delay_with_hint(3, Some(Duration::from_secs(1))),
            Duration::from_secs(8)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(86_400))),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = fixed();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
