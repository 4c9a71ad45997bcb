//! Exponential backoff for reconnection scheduling.
//!
//! Kept as pure functions so the growth curve can be tested without
//! spinning up timers. Jitter is applied separately to avoid synchronized
//! retry storms across the pool's connections.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(base * decay^(attempt - 1), max)`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, decay: f64) -> Duration {
    if attempt <= 1 {
        return base.min(max);
    }
    let grown = base.as_millis() as f64 * decay.powi((attempt - 1) as i32);
    let capped = grown.min(max.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

/// Add up to `factor` (e.g. 0.2 for 20%) of random jitter on top of `delay`.
pub fn with_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let jitter = rand::rng().random_range(0.0..=factor);
    delay.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1000);
    const MAX: Duration = Duration::from_millis(30_000);

    #[test]
    fn test_first_attempt_uses_base_delay() {
        assert_eq!(backoff_delay(1, BASE, MAX, 1.5), BASE);
    }

    #[test]
    fn test_delay_is_non_decreasing() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = backoff_delay(attempt, BASE, MAX, 1.5);
            assert!(
                delay >= previous,
                "attempt {attempt}: {delay:?} < {previous:?}"
            );
            previous = delay;
        }
    }

    #[test]
    fn test_delay_caps_at_max() {
        let delay = backoff_delay(50, BASE, MAX, 2.0);
        assert_eq!(delay, MAX);
    }

    #[test]
    fn test_base_already_above_max_is_capped() {
        let delay = backoff_delay(1, Duration::from_secs(60), MAX, 1.5);
        assert_eq!(delay, MAX);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..100 {
            let jittered = with_jitter(BASE, 0.2);
            assert!(jittered >= BASE);
            assert!(jittered <= BASE.mul_f64(1.2));
        }
    }

    #[test]
    fn test_zero_jitter_factor_is_identity() {
        assert_eq!(with_jitter(BASE, 0.0), BASE);
    }
}
