//! Polling and retry policies.

use std::time::Duration;

use tokio::time::Instant;

/// Bounded exponential backoff used while waiting on a CA resource to change state.
///
/// The delay starts at `initial_interval`, doubles after each attempt up to `max_interval`, and
/// polling gives up once `max_elapsed` has passed. A `Retry-After` sent by the CA replaces the
/// computed delay for that attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl PollPolicy {
    pub const fn new(initial_interval: Duration, max_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_elapsed,
        }
    }

    /// Polls every `interval` until `max_elapsed`.
    pub const fn fixed(interval: Duration, max_elapsed: Duration) -> Self {
        Self::new(interval, interval, max_elapsed)
    }

    pub(crate) fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial_interval,
            started: Instant::now(),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(180),
        )
    }
}

/// Running state of a [`PollPolicy`].
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: PollPolicy,
    next: Duration,
    started: Instant,
}

impl Backoff {
    /// Returns the delay before the next attempt, or `None` once the wall-clock budget is spent.
    pub(crate) fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        let remaining = self.policy.max_elapsed.checked_sub(self.started.elapsed())?;
        if remaining.is_zero() {
            return None;
        }

        let delay = retry_after.unwrap_or(self.next).min(remaining);
        self.next = (self.next * 2).min(self.policy.max_interval);

        Some(delay)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Retries for transient failures (connection errors, timeouts, 5xx) of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt` (the first retry is attempt 2).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        (self.initial_delay * 2u32.pow(exp)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max_interval() {
        let policy = PollPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(350),
            Duration::from_secs(60),
        );
        let mut backoff = policy.start();

        let delays = (0..4)
            .map(|_| backoff.next_delay(None).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            delays,
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let mut backoff = PollPolicy::default().start();
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(7))),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn retry_after_is_capped_by_remaining_budget() {
        let mut backoff = PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(2)).start();
        let delay = backoff.next_delay(Some(Duration::from_secs(3600))).unwrap();
        assert!(delay <= Duration::from_secs(2));
    }

    #[test]
    fn exhausted_budget_stops_polling() {
        let mut backoff = PollPolicy::fixed(Duration::from_millis(1), Duration::ZERO).start();
        assert_eq!(backoff.next_delay(None), None);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };

        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(300));
    }
}
