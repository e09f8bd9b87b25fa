//! Wait times between retry attempts.
//!
//! The delay follows:
//! ```text
//! base   = fixed | initial * multiplier^(attempt - 1)
//! capped = min(base, max_delay)
//! final  = capped, or uniform in [0, capped] with jitter
//! ```
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Curve {
    None,
    Fixed(Duration),
    Exponential { initial: Duration, multiplier: f64 },
}

/// Maps a failed attempt number to how long to wait before the next one.
///
/// `attempt` is 1-based and names the attempt that just failed, so
/// `delay(1)` is the wait before attempt 2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    curve: Curve,
    max_delay: Option<Duration>,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::none()
    }
}

impl Backoff {
    const fn with_curve(curve: Curve) -> Self {
        Self {
            curve,
            max_delay: None,
            jitter: false,
        }
    }

    /// Retry immediately.
    pub const fn none() -> Self {
        Self::with_curve(Curve::None)
    }

    pub const fn fixed(delay: Duration) -> Self {
        Self::with_curve(Curve::Fixed(delay))
    }

    /// `initial`, then `initial * multiplier`, `initial * multiplier^2`, ...
    /// Multipliers below 1.0 are raised to 1.0.
    pub fn exponential(initial: Duration, multiplier: f64) -> Self {
        Self::with_curve(Curve::Exponential {
            initial,
            multiplier: multiplier.max(1.0),
        })
    }

    #[must_use]
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = Some(cap);
        self
    }

    /// Randomizes each delay uniformly between zero and its capped value.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = match self.curve {
            Curve::None => Duration::ZERO,
            Curve::Fixed(delay) => delay,
            Curve::Exponential {
                initial,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let nanos = initial.as_nanos() as f64 * multiplier.powi(exponent);
                if nanos.is_finite() && nanos < u64::MAX as f64 {
                    Duration::from_nanos(nanos as u64)
                } else {
                    Duration::MAX
                }
            }
        };
        let capped = match self.max_delay {
            Some(cap) => base.min(cap),
            None => base,
        };
        if self.jitter && !capped.is_zero() {
            let upper = u64::try_from(capped.as_nanos()).unwrap_or(u64::MAX);
            Duration::from_nanos(rng.gen_range(0..=upper))
        } else {
            capped
        }
    }
}
