//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Uniform jitter band applied to computed delays so concurrent loops don't
/// synchronize their retries.
const JITTER_MIN: f64 = 0.7;
const JITTER_MAX: f64 = 1.3;

/// Computes the delay before each retry: `initial * 2^(attempt-1)` capped at
/// `max`, then jittered uniformly in `[0.7, 1.3]`.
///
/// Provider-suggested delays bypass this schedule entirely; the engine uses
/// them verbatim.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    initial: Duration,
    max: Duration,
}

impl BackoffSchedule {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Jittered delay after the failure of `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let base_ms = self
            .initial
            .as_millis()
            .saturating_mul(1u128 << shift)
            .min(self.max.as_millis());
        let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        Duration::from_millis((base_ms as f64 * factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_within(delay: Duration, low_ms: u64, high_ms: u64) {
        let ms = delay.as_millis() as u64;
        assert!(
            (low_ms..=high_ms).contains(&ms),
            "delay {ms}ms outside [{low_ms}, {high_ms}]"
        );
    }

    #[test]
    fn first_delay_jitters_around_initial() {
        let schedule = BackoffSchedule::new(Duration::from_millis(100), Duration::from_secs(30));
        for _ in 0..200 {
            assert_within(schedule.delay_for(1), 70, 130);
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let schedule = BackoffSchedule::new(Duration::from_millis(100), Duration::from_millis(250));
        for _ in 0..200 {
            assert_within(schedule.delay_for(2), 140, 260);
            // 100 * 2^2 = 400 caps at 250 before jitter.
            assert_within(schedule.delay_for(3), 175, 325);
            assert_within(schedule.delay_for(10), 175, 325);
        }
    }

    #[test]
    fn large_attempt_numbers_do_not_overflow() {
        let schedule = BackoffSchedule::new(Duration::from_secs(5), Duration::from_secs(30));
        assert_within(schedule.delay_for(u32::MAX), 21_000, 39_000);
    }
}
