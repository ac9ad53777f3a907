//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// `max`, plus up to 10% jitter. Attempt 0 has no delay.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    let capped = base.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}

/// Stateful backoff for a polling loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(100);

        assert_eq!(calculate_backoff(0, base, Duration::from_secs(2)), Duration::ZERO);

        let b1 = calculate_backoff(1, base, Duration::from_secs(2));
        assert!(b1 >= Duration::from_millis(100) && b1 < Duration::from_millis(110));

        let b2 = calculate_backoff(2, base, Duration::from_secs(2));
        assert!(b2 >= Duration::from_millis(200));

        let capped = calculate_backoff(10, base, Duration::from_secs(1));
        assert!(capped >= Duration::from_secs(1) && capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let d = calculate_backoff(u32::MAX, Duration::from_millis(10), Duration::from_millis(500));
        assert!(d >= Duration::from_millis(500));
    }

    #[test]
    fn test_stateful_backoff_grows() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(80));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();

        assert_eq!(backoff.attempts(), 5);
        assert!(delays[1] >= Duration::from_millis(20));
        assert!(delays[4] >= Duration::from_millis(80));
    }
}
