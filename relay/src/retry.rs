use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait before the next publish attempt
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Retry budget for transient publish failures, independent of the worker
/// loop so the arithmetic can be checked without any timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, BackoffStrategy::Fixed(delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempts_made` counts every attempt so far, including the one that
    /// just failed.
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_after(attempts_made))
    }

    /// Delay before attempt `attempts_made + 1`
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, multiplier, max } => {
                let mut backoff = ExponentialBackoffBuilder::new()
                    .with_initial_interval(*initial)
                    .with_multiplier(*multiplier)
                    .with_max_interval(*max)
                    .with_randomization_factor(0.0)
                    .with_max_elapsed_time(None)
                    .build();

                let mut delay = *initial;
                for _ in 0..attempts_made.max(1) {
                    delay = backoff.next_backoff().unwrap_or(*max);
                }
                delay
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::from_secs(5)));
        assert_eq!(policy.decide(2), RetryDecision::RetryAfter(Duration::from_secs(5)));
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.decide(1), RetryDecision::GiveUp);
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(
            10,
            BackoffStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max: Duration::from_secs(5),
            },
        );

        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
    }
}
