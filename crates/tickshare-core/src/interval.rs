#![forbid(unsafe_code)]

//! Refresh cadences and the named interval constants.
//!
//! Callers express cadences as millisecond counts, the same way they would
//! pass a raw number to a host timer. [`RefreshInterval::parse`] turns such a
//! number into a validated [`RefreshInterval`]: either a positive integer
//! period or the idle sentinel ([`IDLE`], positive infinity), which never
//! fires periodically.
//!
//! # Ordering
//!
//! Intervals order by period with `Idle` greater than every finite period,
//! so the fastest request among a set is simply the minimum.

use std::fmt;
use std::num::NonZeroU64;

use crate::error::{IntervalParameter, InvalidIntervalError};

/// Never refresh periodically.
pub const IDLE: f64 = f64::INFINITY;

/// One second in milliseconds.
pub const ONE_SECOND: f64 = 1_000.0;

/// One minute in milliseconds.
pub const ONE_MINUTE: f64 = 60_000.0;

/// One hour in milliseconds.
pub const ONE_HOUR: f64 = 3_600_000.0;

/// Largest millisecond count accepted as a finite period (2^53, the exact
/// integer range of an `f64`).
const MAX_EXACT_MILLIS: f64 = 9_007_199_254_740_992.0;

/// A validated refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefreshInterval {
    /// Refresh every `n` milliseconds.
    Every(NonZeroU64),
    /// Never refresh periodically.
    Idle,
}

impl RefreshInterval {
    /// Validate a raw millisecond count supplied as `parameter`.
    ///
    /// Accepts positive finite integers and, when the parameter allows it,
    /// positive infinity as [`RefreshInterval::Idle`]. Rejects NaN, zero,
    /// negatives, negative infinity and fractional values.
    pub fn parse(value: f64, parameter: IntervalParameter) -> Result<Self, InvalidIntervalError> {
        let invalid = || InvalidIntervalError::new(parameter, value);
        if value == f64::INFINITY {
            return if parameter.accepts_idle() {
                Ok(Self::Idle)
            } else {
                Err(invalid())
            };
        }
        if !value.is_finite() || value < 1.0 || value.fract() != 0.0 || value > MAX_EXACT_MILLIS {
            return Err(invalid());
        }
        // Integral and within 1..=2^53, so the cast is exact.
        NonZeroU64::new(value as u64)
            .map(Self::Every)
            .ok_or_else(invalid)
    }

    /// A finite period of `ms` milliseconds; `None` for zero.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Option<Self> {
        match NonZeroU64::new(ms) {
            Some(n) => Some(Self::Every(n)),
            None => None,
        }
    }

    /// The period in milliseconds, or `None` when idle.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> Option<u64> {
        match self {
            Self::Every(n) => Some(n.get()),
            Self::Idle => None,
        }
    }

    /// Whether this is the idle sentinel.
    #[inline]
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Raise a finite period to at least `floor`. Idle stays idle.
    #[must_use]
    pub fn clamp_to(self, floor: NonZeroU64) -> Self {
        match self {
            Self::Every(n) => Self::Every(n.max(floor)),
            Self::Idle => Self::Idle,
        }
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(n) => write!(f, "{n}ms"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TARGET: IntervalParameter = IntervalParameter::TargetRefreshInterval;
    const MINIMUM: IntervalParameter = IntervalParameter::MinimumRefreshInterval;

    fn every(ms: u64) -> RefreshInterval {
        RefreshInterval::from_millis(ms).expect("non-zero")
    }

    #[test]
    fn constants_parse() {
        assert_eq!(RefreshInterval::parse(ONE_SECOND, TARGET), Ok(every(1_000)));
        assert_eq!(RefreshInterval::parse(ONE_MINUTE, TARGET), Ok(every(60_000)));
        assert_eq!(RefreshInterval::parse(ONE_HOUR, TARGET), Ok(every(3_600_000)));
        assert_eq!(RefreshInterval::parse(IDLE, TARGET), Ok(RefreshInterval::Idle));
    }

    #[test]
    fn rejects_invalid_values() {
        for value in [f64::NAN, f64::NEG_INFINITY, 0.0, -0.0, -42.0, 470.53, 0.5] {
            for parameter in [TARGET, MINIMUM] {
                let err = RefreshInterval::parse(value, parameter).unwrap_err();
                assert_eq!(err.parameter(), parameter);
                assert!(err.to_string().contains(&value.to_string()));
            }
        }
    }

    #[test]
    fn minimum_rejects_idle() {
        let err = RefreshInterval::parse(IDLE, MINIMUM).unwrap_err();
        assert!(err.to_string().ends_with("got inf"));
    }

    #[test]
    fn rejects_beyond_exact_range() {
        assert!(RefreshInterval::parse(1e300, TARGET).is_err());
        assert_eq!(
            RefreshInterval::parse(MAX_EXACT_MILLIS, TARGET)
                .ok()
                .and_then(RefreshInterval::as_millis),
            Some(1 << 53)
        );
    }

    #[test]
    fn idle_is_slowest() {
        assert!(every(u64::MAX) < RefreshInterval::Idle);
        assert!(every(500) < every(1_000));
        let fastest = [every(1_000), RefreshInterval::Idle, every(500)]
            .into_iter()
            .min();
        assert_eq!(fastest, Some(every(500)));
    }

    #[test]
    fn clamp_raises_to_floor() {
        let floor = NonZeroU64::new(200).expect("non-zero");
        assert_eq!(every(50).clamp_to(floor), every(200));
        assert_eq!(every(500).clamp_to(floor), every(500));
        assert_eq!(RefreshInterval::Idle.clamp_to(floor), RefreshInterval::Idle);
    }

    #[test]
    fn display() {
        assert_eq!(every(250).to_string(), "250ms");
        assert_eq!(RefreshInterval::Idle.to_string(), "idle");
    }

    proptest! {
        #[test]
        fn positive_integers_round_trip(ms in 1u64..=(1 << 53)) {
            let parsed = RefreshInterval::parse(ms as f64, TARGET).unwrap();
            prop_assert_eq!(parsed.as_millis(), Some(ms));
        }

        #[test]
        fn fractional_values_rejected(whole in 0u32..1_000_000, frac in 0.001f64..0.999) {
            let value = f64::from(whole) + frac;
            prop_assert!(RefreshInterval::parse(value, TARGET).is_err());
        }
    }
}
