//! Retry policy for step actions and compensations.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and optional jitter. Only transient
/// failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Spread delays by up to 10% to avoid synchronized retry storms.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base: Duration::ZERO,
            factor: 2,
            cap: Duration::ZERO,
            max_attempts,
            jitter: false,
        }
    }

    /// Delay before the given retry. `attempt` is 1-based and counts the
    /// attempt that just failed: the first retry waits `base`, the second
    /// `base * factor`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self
            .base
            .saturating_mul(self.factor.saturating_pow(exponent));
        let capped = scaled.min(self.cap);
        if self.jitter && !capped.is_zero() {
            let millis = capped.as_millis() as u64;
            let spread = millis / 10;
            if spread > 0 {
                let offset = rand::thread_rng().gen_range(0..=spread);
                return Duration::from_millis(millis - spread / 2 + offset);
            }
        }
        capped
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_up_to_cap() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_near_nominal() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let nominal = RetryPolicy {
                jitter: false,
                ..RetryPolicy::default()
            }
            .delay_for(attempt);
            let jittered = policy.delay_for(attempt);
            let nominal_ms = nominal.as_millis() as i128;
            let jittered_ms = jittered.as_millis() as i128;
            assert!((jittered_ms - nominal_ms).abs() <= nominal_ms / 10 + 1);
        }
    }

    #[test]
    fn exhaustion_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.attempts_exhausted(1));
        assert!(!policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
    }
}
