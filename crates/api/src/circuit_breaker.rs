//! Consecutive-failure circuit breaker for the primary price provider.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

/// Opens after `threshold` consecutive failures and stays open for `cooldown`.
///
/// Once the cooldown elapses the next call is let through to the primary;
/// another failure reopens the circuit immediately, a success closes it.
pub struct CircuitBreaker {
    failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failures", &self.failures())
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("open", &self.is_open())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Time left before the primary may be tried again, if open.
    pub fn remaining(&self) -> Option<Duration> {
        let open_until = (*self.open_until.lock())?;
        let now = Instant::now();
        (now < open_until).then(|| open_until - now)
    }

    pub fn is_open(&self) -> bool {
        self.remaining().is_some()
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        *self.open_until.lock() = None;
    }

    /// Count a failure; returns true if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if failures < self.threshold {
            return false;
        }

        *self.open_until.lock() = Some(Instant::now() + self.cooldown);
        warn!(
            failures,
            cooldown_secs = self.cooldown.as_secs(),
            "Primary price feed circuit opened"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        assert_eq!(breaker.failures(), 3);
    }

    #[test]
    fn test_success_resets() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_cooldown_expires() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!breaker.is_open());
        // Counter is still at threshold, so the next failure reopens at once
        assert!(breaker.record_failure());
    }
}
