//! Bounded retry policy for provider requests.
//!
//! Two failure classes are retried and each has its own budget: rate-limit
//! responses back off exponentially up to a ceiling, transport failures get a
//! short fixed pause. Every other failure ends the fetch immediately.

use std::time::Duration;

use crate::ErrorKind;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Exponential doubling from `base`, never exceeding `ceiling`.
    pub fn doubling(base: Duration, ceiling: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max: ceiling,
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// Exponential delays are non-decreasing in `retry` and never exceed `max`.
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, factor, max } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                if !seconds.is_finite() || seconds >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(seconds)
                }
            }
        }
    }
}

/// Retry budgets for one symbol's fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed while the provider keeps signalling a rate limit.
    pub max_attempts: u32,
    pub rate_limit_backoff: Backoff,
    /// Extra attempts after a transport failure.
    pub unreachable_retries: u32,
    pub unreachable_backoff: Backoff,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_UNREACHABLE_RETRIES: u32 = 1;
    pub const DEFAULT_UNREACHABLE_DELAY: Duration = Duration::from_secs(2);

    /// Policy whose rate-limit backoff starts at the request interval and is
    /// capped at `ceiling`.
    pub fn from_interval(interval: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            rate_limit_backoff: Backoff::doubling(interval, ceiling.max(interval)),
            unreachable_retries: Self::DEFAULT_UNREACHABLE_RETRIES,
            unreachable_backoff: Backoff::Fixed {
                delay: Self::DEFAULT_UNREACHABLE_DELAY,
            },
        }
    }

    /// Policy that gives up on the first failure of any kind.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            rate_limit_backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
            unreachable_retries: 0,
            unreachable_backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_interval(Duration::from_secs(15), Duration::from_secs(60))
    }
}

/// Failure counters for one fetch, consulted after every failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    rate_limited: u32,
    unreachable: u32,
}

impl RetryState {
    /// Record a failure of `kind` and return the pause before the next
    /// attempt, or `None` when the fetch must stop.
    pub fn next_delay(&mut self, policy: &RetryPolicy, kind: ErrorKind) -> Option<Duration> {
        match kind {
            ErrorKind::RateLimited => {
                self.rate_limited = self.rate_limited.saturating_add(1);
                if self.rate_limited >= policy.max_attempts {
                    return None;
                }
                Some(policy.rate_limit_backoff.delay(self.rate_limited - 1))
            }
            ErrorKind::Unreachable => {
                self.unreachable = self.unreachable.saturating_add(1);
                if self.unreachable > policy.unreachable_retries {
                    return None;
                }
                Some(policy.unreachable_backoff.delay(self.unreachable - 1))
            }
            ErrorKind::InvalidSymbol
            | ErrorKind::MalformedResponse
            | ErrorKind::StorageUnavailable => None,
        }
    }

    pub const fn rate_limited(&self) -> u32 {
        self.rate_limited
    }

    pub const fn unreachable(&self) -> u32 {
        self.unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_interval(Duration::from_secs(15), Duration::from_secs(60))
    }

    #[test]
    fn exponential_backoff_doubles_until_ceiling() {
        let backoff = Backoff::doubling(Duration::from_secs(15), Duration::from_secs(60));

        assert_eq!(backoff.delay(0), Duration::from_secs(15));
        assert_eq!(backoff.delay(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(2), Duration::from_secs(60));
        assert_eq!(backoff.delay(3), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn rate_limit_delays_are_non_decreasing_and_bounded() {
        let policy = policy();
        let mut state = RetryState::default();
        let mut delays = Vec::new();
        while let Some(delay) = state.next_delay(&policy, ErrorKind::RateLimited) {
            delays.push(delay);
        }

        assert_eq!(delays.len(), 4);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(60)));
        assert_eq!(state.rate_limited(), 5);
    }

    #[test]
    fn unreachable_is_retried_once_after_fixed_delay() {
        let policy = policy();
        let mut state = RetryState::default();

        assert_eq!(
            state.next_delay(&policy, ErrorKind::Unreachable),
            Some(Duration::from_secs(2))
        );
        assert_eq!(state.next_delay(&policy, ErrorKind::Unreachable), None);
    }

    #[test]
    fn terminal_kinds_never_retry() {
        let policy = policy();
        for kind in [
            ErrorKind::InvalidSymbol,
            ErrorKind::MalformedResponse,
            ErrorKind::StorageUnavailable,
        ] {
            let mut state = RetryState::default();
            assert_eq!(state.next_delay(&policy, kind), None, "{kind}");
        }
    }

    #[test]
    fn budgets_are_tracked_independently() {
        let policy = policy();
        let mut state = RetryState::default();

        assert!(state.next_delay(&policy, ErrorKind::Unreachable).is_some());
        assert!(state.next_delay(&policy, ErrorKind::RateLimited).is_some());
        assert!(state.next_delay(&policy, ErrorKind::RateLimited).is_some());
        assert_eq!(state.unreachable(), 1);
        assert_eq!(state.rate_limited(), 2);
    }

    #[test]
    fn no_retry_policy_stops_immediately() {
        let policy = RetryPolicy::no_retry();
        let mut state = RetryState::default();
        assert_eq!(state.next_delay(&policy, ErrorKind::RateLimited), None);
        assert_eq!(state.next_delay(&policy, ErrorKind::Unreachable), None);
    }
}
