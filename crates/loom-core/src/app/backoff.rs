//! Poll backoff: decides how long an idle worker sleeps.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for idle polls.
///
/// delay = base * multiplier^(idle_polls - 1), capped at `max`, then
/// jittered down by up to `jitter` of its value so idle workers spread out.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction in `0.0..=1.0`.
    pub jitter: f64,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            jitter: 0.2,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the next poll after `idle_polls` consecutive idle polls
    /// (1-indexed). Zero idle polls means no delay.
    pub fn next_delay(&self, idle_polls: u32) -> Duration {
        if idle_polls == 0 {
            return Duration::ZERO;
        }
        let exp = idle_polls.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);
        let capped = if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return capped;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=jitter);
        capped.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PollBackoff {
        PollBackoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0)
    }

    #[test]
    fn exponential_backoff_increases_until_cap() {
        let p = policy().without_jitter();
        assert_eq!(p.next_delay(0), Duration::ZERO);
        assert_eq!(p.next_delay(1), Duration::from_millis(100));
        assert_eq!(p.next_delay(2), Duration::from_millis(200));
        assert_eq!(p.next_delay(3), Duration::from_millis(400));
        assert_eq!(p.next_delay(10), Duration::from_secs(1));
        assert_eq!(p.next_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn long_idle_streak_stays_at_cap() {
        let p = PollBackoff::new(Duration::from_millis(250), Duration::from_secs(5), 2.0);
        for idle in 1..=200 {
            assert!(p.clone().without_jitter().next_delay(idle) <= Duration::from_secs(5));
            assert!(p.next_delay(idle) <= Duration::from_secs(5));
        }
        assert_eq!(p.without_jitter().next_delay(68), Duration::from_secs(5));
    }

    #[test]
    fn jitter_only_shortens_delay() {
        let p = policy();
        for idle in 1..8 {
            let full = p.clone().without_jitter().next_delay(idle);
            let d = p.next_delay(idle);
            assert!(d <= full);
            assert!(d >= full.mul_f64(0.8) - Duration::from_nanos(1));
        }
    }
}
