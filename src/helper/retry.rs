//! Bounded polling with exponential backoff.

use std::{
    thread,
    time::{Duration, Instant},
};

/// How long to keep probing and how long to sleep between probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            timeout,
            initial_delay,
            max_delay,
        }
    }

    /// Calls `probe` until it yields a value, fails, or the timeout elapses.
    ///
    /// The probe always runs at least once. The delay doubles after every
    /// miss, capped at `max_delay` and at the time left before the deadline.
    /// Returns `Ok(None)` on timeout.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use blazor_host::helper::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(
    ///     Duration::from_secs(1),
    ///     Duration::from_millis(1),
    ///     Duration::from_millis(4),
    /// );
    /// let mut calls = 0;
    /// let found = policy.poll(|| -> Result<Option<u32>, ()> {
    ///     calls += 1;
    ///     Ok((calls == 3).then_some(calls))
    /// });
    /// assert_eq!(found, Ok(Some(3)));
    /// ```
    pub fn poll<T, E>(
        &self,
        mut probe: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        let deadline = Instant::now() + self.timeout;
        let mut delay = self.initial_delay;

        loop {
            if let Some(value) = probe()? {
                return Ok(Some(value));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(self.max_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn gives_up_after_timeout() {
        let started = Instant::now();
        let result = quick(30).poll(|| -> Result<Option<()>, ()> { Ok(None) });

        assert_eq!(result, Ok(None));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn probe_error_stops_polling() {
        let mut calls = 0;
        let result = quick(1_000).poll(|| -> Result<Option<()>, &str> {
            calls += 1;
            Err("boom")
        });

        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_timeout_still_probes_once() {
        let mut calls = 0;
        let result = quick(0).poll(|| -> Result<Option<u8>, ()> {
            calls += 1;
            Ok(Some(7))
        });

        assert_eq!(result, Ok(Some(7)));
        assert_eq!(calls, 1);
    }
}
