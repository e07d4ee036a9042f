//! Backoff policies applied between retry attempts, and the selector that derives one from a
//! [`BackoffDescriptor`].
//!
//! Attempt semantics follow the rest of the crate: attempt `0` is the initial call (no delay) and
//! retries start at `attempt = 1`. Delays saturate at [`MAX_BACKOFF`].
//!
//! Selection is a strict decision tree; the first matching rule wins:
//! 1. `min = delay` if non-zero, else the legacy `value`; `max = max_delay`.
//! 2. `multiplier > 0` ⇒ exponential from `min` (randomized when `random` is set), capped at `max`
//!    when `max > min`, else at [`DEFAULT_MAX_INTERVAL`].
//! 3. `max > min` ⇒ uniform random in `[min, max]`.
//! 4. otherwise a fixed delay of `min`.
//!
//! Example
//! ```rust
//! use lifeline::backoff::{select_backoff, BackoffKind};
//! use lifeline::{BackoffDescriptor, InstantSleeper};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let descriptor = BackoffDescriptor::default()
//!     .delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_millis(500));
//! let policy = select_backoff(&descriptor, Arc::new(InstantSleeper));
//! assert_eq!(
//!     policy.kind(),
//!     &BackoffKind::UniformRandom {
//!         min: Duration::from_millis(100),
//!         max: Duration::from_millis(500)
//!     }
//! );
//! ```

use crate::descriptor::BackoffDescriptor;
use crate::sleeper::Sleeper;
use rand::{rng, Rng};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Cap applied to exponential backoff when the descriptor gives no usable `max_delay`.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// The delay algorithm and its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffKind {
    /// Retry immediately.
    NoBackoff,
    /// Same delay before every retry.
    Fixed { period: Duration },
    /// Uniformly random delay in `[min, max]`.
    UniformRandom { min: Duration, max: Duration },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential { initial: Duration, multiplier: f64, max: Duration },
    /// Exponential delay stretched by a random factor in `[1, multiplier)`, capped at `max`.
    ExponentialRandom { initial: Duration, multiplier: f64, max: Duration },
}

impl BackoffKind {
    /// Calculate the delay for a given attempt (0 = initial call, no delay).
    pub fn delay_with_rng<R: Rng>(&self, attempt: usize, rng: &mut R) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            BackoffKind::NoBackoff => Duration::ZERO,
            BackoffKind::Fixed { period } => period.min(MAX_BACKOFF),
            BackoffKind::UniformRandom { min, max } => {
                let lo = as_millis_saturated(min);
                let hi = as_millis_saturated(max).max(lo);
                Duration::from_millis(rng.random_range(lo..=hi)).min(MAX_BACKOFF)
            }
            BackoffKind::Exponential { initial, multiplier, max } => {
                exponential(initial, multiplier, attempt).min(max).min(MAX_BACKOFF)
            }
            BackoffKind::ExponentialRandom { initial, multiplier, max } => {
                let base = exponential(initial, multiplier, attempt).min(max);
                let stretch = 1.0 + rng.random::<f64>() * (multiplier - 1.0).max(0.0);
                scale(base, stretch).min(max).min(MAX_BACKOFF)
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

fn exponential(initial: Duration, multiplier: f64, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
    scale(initial, multiplier.powi(exponent))
}

fn scale(base: Duration, factor: f64) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let nanos = base.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos >= MAX_BACKOFF.as_nanos() as f64 {
        return MAX_BACKOFF;
    }
    if nanos <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(nanos.round() as u64)
}

/// A backoff algorithm bound to the sleeper that applies it.
#[derive(Clone)]
pub struct BackoffPolicy {
    kind: BackoffKind,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("kind", &self.kind)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl PartialEq for BackoffPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl BackoffPolicy {
    pub fn new(kind: BackoffKind, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { kind, sleeper }
    }

    /// Policy that never waits.
    pub fn none(sleeper: Arc<dyn Sleeper>) -> Self {
        Self::new(BackoffKind::NoBackoff, sleeper)
    }

    pub fn kind(&self) -> &BackoffKind {
        &self.kind
    }

    /// Delay before `attempt`, drawing randomness from the thread-local RNG.
    pub fn delay(&self, attempt: usize) -> Duration {
        self.kind.delay_with_rng(attempt, &mut rng())
    }

    /// Sleep for the delay that precedes `attempt`.
    pub async fn backoff(&self, attempt: usize) {
        if self.kind == BackoffKind::NoBackoff {
            return;
        }
        let delay = self.delay(attempt);
        self.sleeper.sleep(delay).await;
    }
}

/// Pick the backoff policy described by `descriptor`.
pub fn select_backoff(descriptor: &BackoffDescriptor, sleeper: Arc<dyn Sleeper>) -> BackoffPolicy {
    let min = if descriptor.get_delay().is_zero() {
        descriptor.get_value()
    } else {
        descriptor.get_delay()
    };
    let max = descriptor.get_max_delay();

    let kind = if descriptor.get_multiplier() > 0.0 {
        let initial = min;
        let multiplier = descriptor.get_multiplier();
        let max = if max > min { max } else { DEFAULT_MAX_INTERVAL };
        if descriptor.is_random() {
            BackoffKind::ExponentialRandom { initial, multiplier, max }
        } else {
            BackoffKind::Exponential { initial, multiplier, max }
        }
    } else if max > min {
        BackoffKind::UniformRandom { min, max }
    } else {
        BackoffKind::Fixed { period: min }
    };
    BackoffPolicy::new(kind, sleeper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn select(descriptor: BackoffDescriptor) -> BackoffKind {
        *select_backoff(&descriptor, Arc::new(InstantSleeper)).kind()
    }

    #[test]
    fn delay_only_selects_fixed() {
        let kind = select(BackoffDescriptor::default().delay(ms(100)));
        assert_eq!(kind, BackoffKind::Fixed { period: ms(100) });
    }

    #[test]
    fn delay_and_larger_max_selects_uniform() {
        let kind = select(BackoffDescriptor::default().delay(ms(100)).max_delay(ms(500)));
        assert_eq!(kind, BackoffKind::UniformRandom { min: ms(100), max: ms(500) });
    }

    #[test]
    fn multiplier_without_max_uses_default_cap() {
        let kind = select(BackoffDescriptor::default().delay(ms(100)).multiplier(2.0));
        assert_eq!(
            kind,
            BackoffKind::Exponential {
                initial: ms(100),
                multiplier: 2.0,
                max: DEFAULT_MAX_INTERVAL
            }
        );
    }

    #[test]
    fn random_multiplier_with_max_selects_exponential_random() {
        let kind = select(
            BackoffDescriptor::default()
                .delay(ms(100))
                .max_delay(ms(1000))
                .multiplier(2.0)
                .random(true),
        );
        assert_eq!(
            kind,
            BackoffKind::ExponentialRandom { initial: ms(100), multiplier: 2.0, max: ms(1000) }
        );
    }

    #[test]
    fn zero_delay_falls_back_to_legacy_value() {
        assert_eq!(select(BackoffDescriptor::default()), BackoffKind::Fixed { period: ms(1000) });
        let kind = select(BackoffDescriptor::default().value(ms(250)).max_delay(ms(750)));
        assert_eq!(kind, BackoffKind::UniformRandom { min: ms(250), max: ms(750) });
    }

    #[test]
    fn max_not_above_min_is_ignored() {
        let kind = select(BackoffDescriptor::default().delay(ms(500)).max_delay(ms(500)));
        assert_eq!(kind, BackoffKind::Fixed { period: ms(500) });
        let kind =
            select(BackoffDescriptor::default().delay(ms(500)).max_delay(ms(100)).multiplier(1.5));
        assert_eq!(
            kind,
            BackoffKind::Exponential {
                initial: ms(500),
                multiplier: 1.5,
                max: DEFAULT_MAX_INTERVAL
            }
        );
    }

    #[test]
    fn random_flag_without_multiplier_is_ignored() {
        let kind = select(BackoffDescriptor::default().delay(ms(100)).random(true));
        assert_eq!(kind, BackoffKind::Fixed { period: ms(100) });
    }

    #[test]
    fn exponential_grows_and_caps() {
        let kind = BackoffKind::Exponential { initial: ms(100), multiplier: 2.0, max: ms(1000) };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(kind.delay_with_rng(0, &mut rng), Duration::ZERO);
        assert_eq!(kind.delay_with_rng(1, &mut rng), ms(100));
        assert_eq!(kind.delay_with_rng(2, &mut rng), ms(200));
        assert_eq!(kind.delay_with_rng(4, &mut rng), ms(800));
        assert_eq!(kind.delay_with_rng(5, &mut rng), ms(1000));
        assert_eq!(kind.delay_with_rng(1_000_000, &mut rng), ms(1000));
    }

    #[test]
    fn exponential_saturates_on_overflow() {
        let kind =
            BackoffKind::Exponential { initial: ms(1000), multiplier: 10.0, max: Duration::MAX };
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(kind.delay_with_rng(usize::MAX, &mut rng), MAX_BACKOFF);
    }

    #[test]
    fn uniform_random_stays_in_bounds() {
        let kind = BackoffKind::UniformRandom { min: ms(100), max: ms(500) };
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..200 {
            let d = kind.delay_with_rng(attempt, &mut rng);
            assert!(d >= ms(100) && d <= ms(500), "{:?} out of range", d);
        }
    }

    #[test]
    fn exponential_random_stretches_within_cap() {
        let kind =
            BackoffKind::ExponentialRandom { initial: ms(100), multiplier: 2.0, max: ms(1000) };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let first = kind.delay_with_rng(1, &mut rng);
            assert!(first >= ms(100) && first <= ms(200), "{:?}", first);
            let third = kind.delay_with_rng(3, &mut rng);
            assert!(third >= ms(400) && third <= ms(800), "{:?}", third);
            assert!(kind.delay_with_rng(9, &mut rng) <= ms(1000));
        }
    }

    #[tokio::test]
    async fn backoff_sleeps_through_configured_sleeper() {
        let sleeper = TrackingSleeper::new();
        let policy =
            BackoffPolicy::new(BackoffKind::Fixed { period: ms(40) }, Arc::new(sleeper.clone()));
        policy.backoff(1).await;
        policy.backoff(2).await;
        assert_eq!(sleeper.delays(), vec![ms(40), ms(40)]);

        let none = BackoffPolicy::none(Arc::new(sleeper.clone()));
        none.backoff(1).await;
        assert_eq!(sleeper.calls(), 2, "no-backoff policy must not sleep");
    }
}
