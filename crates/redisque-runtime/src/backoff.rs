//! Fibonacci-shaped backoff for the scheduler's leadership attempts.

use std::time::Duration;

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;

/// Delay generator producing `initial * fib(n)`, capped at `max`
///
/// # Examples
///
/// ```rust
/// use redisque_runtime::backoff::FibonacciBackoff;
/// use std::time::Duration;
///
/// let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    initial: Duration,
    max: Duration,
    previous: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            previous: Duration::ZERO,
            current: initial.min(max),
        }
    }

    /// Delay to wait before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.previous.saturating_add(self.current).min(self.max);
        self.previous = self.current;
        self.current = next;
        delay
    }

    /// Delay the next call to [`FibonacciBackoff::next_delay`] will return
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Return to the first step of the sequence
    pub fn reset(&mut self) {
        self.previous = Duration::ZERO;
        self.current = self.initial.min(self.max);
    }
}
