use std::time::Duration;

/// Reconnection policy for the bidirectional transport.
///
/// Backoff is linear (`base_delay * attempt`) rather than exponential: an
/// interactive chat wants a predictable, bounded worst case, not the long tail
/// a batch system would tolerate. After `max_attempts` consecutive failures the
/// policy is exhausted and the transport surfaces a permanent error; a fresh
/// `open()` starts over from attempt zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(1000) }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// Whether attempt number `attempt` (1-based) may run at all.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_attempts_then_permanent_failure() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=5 {
            assert!(policy.should_retry(attempt), "attempt {attempt} should run");
        }
        assert!(!policy.should_retry(6), "no sixth attempt");
    }

    #[test]
    fn backoff_is_linear_in_the_attempt_number() {
        let policy = ReconnectPolicy::new(5, Duration::from_millis(1000));
        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(4000),
                Duration::from_millis(5000),
            ]
        );
    }

    #[test]
    fn custom_base_delay_scales() {
        let policy = ReconnectPolicy::new(3, Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert!(!policy.should_retry(4));
    }
}
