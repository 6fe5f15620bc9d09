use std::time::Duration;

use rand::Rng;

/// Shared reconnect/retry policy injected into the exchange stream and
/// candle fetcher, rather than an ad-hoc doubling backoff inlined at each
/// call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_pct: f64,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Exponential backoff with a hard cap, matching the exchange stream's
    /// "base 1s, cap 30s, jitter ±25%" contract.
    pub fn exchange_reconnect() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_pct: 0.25,
            max_attempts: None,
        }
    }

    /// Bounded retry for durable writes: 3 attempts, with jitter applied
    /// for consistency with `exchange_reconnect`.
    pub fn durable_write() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            jitter_pct: 0.1,
            max_attempts: Some(3),
        }
    }

    /// Delay before the `attempt`-th retry (0-indexed: `attempt=0` is the
    /// delay before the first retry after the initial failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.cap.as_millis());
        let jitter_span = (capped as f64 * self.jitter_pct) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let with_jitter = (capped as i64 + jitter).max(0) as u64;
        Duration::from_millis(with_jitter)
    }

    /// Whether another attempt is permitted after `attempts_so_far` failures.
    pub fn should_retry(&self, attempts_so_far: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_so_far < max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_pct: 0.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            base: Duration::from_secs(10),
            cap: Duration::from_secs(10),
            jitter_pct: 0.25,
            max_attempts: None,
        };
        for _ in 0..100 {
            let d = policy.delay_for(0);
            assert!(d.as_millis() >= 7_500 && d.as_millis() <= 12_500);
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::durable_write();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn unbounded_policy_always_retries() {
        let policy = RetryPolicy::exchange_reconnect();
        assert!(policy.should_retry(1000));
    }
}
