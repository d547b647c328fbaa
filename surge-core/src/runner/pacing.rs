use std::time::Duration;

use rand::Rng;

/// Floor for the sleep between iterations.
pub const MIN_PACING_SLEEP: Duration = Duration::from_millis(1);

/// `pacing × (1 + uniform(-jitter, +jitter))`.
pub fn jittered_pacing<R: Rng>(pacing: Duration, jitter: f64, rng: &mut R) -> Duration {
    if jitter <= 0.0 || pacing.is_zero() {
        return pacing;
    }
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    pacing.mul_f64(factor.max(0.0))
}

/// Time left to sleep once an iteration took `elapsed`, never below [`MIN_PACING_SLEEP`].
pub fn next_sleep<R: Rng>(pacing: Duration, jitter: f64, elapsed: Duration, rng: &mut R) -> Duration {
    jittered_pacing(pacing, jitter, rng)
        .saturating_sub(elapsed)
        .max(MIN_PACING_SLEEP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn jitter_stays_within_band() {
        let mut rng = StdRng::seed_from_u64(17);
        let pacing = Duration::from_secs(2);
        let (lo, hi) = (Duration::from_millis(1600), Duration::from_millis(2400));

        let mut saw_below = false;
        let mut saw_above = false;
        for _ in 0..1000 {
            let d = jittered_pacing(pacing, 0.2, &mut rng);
            assert!(d >= lo && d <= hi, "{d:?}");
            saw_below |= d < pacing;
            saw_above |= d > pacing;
        }
        assert!(saw_below && saw_above);
    }

    #[test]
    fn no_jitter_is_exact() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            jittered_pacing(Duration::from_secs(1), 0.0, &mut rng),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn slow_iterations_clamp_to_one_millisecond() {
        let mut rng = StdRng::seed_from_u64(0);
        let d = next_sleep(Duration::from_secs(1), 0.0, Duration::from_secs(3), &mut rng);
        assert_eq!(d, MIN_PACING_SLEEP);

        let d = next_sleep(Duration::ZERO, 0.5, Duration::ZERO, &mut rng);
        assert_eq!(d, MIN_PACING_SLEEP);

        let d = next_sleep(Duration::from_secs(1), 0.0, Duration::from_millis(300), &mut rng);
        assert_eq!(d, Duration::from_millis(700));
    }
}
