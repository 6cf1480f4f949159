#![forbid(unsafe_code)]

//! Validation errors.

use std::fmt;

/// Which caller-supplied interval was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalParameter {
    /// A subscription's requested cadence.
    TargetRefreshInterval,
    /// The engine-wide floor configured at construction.
    MinimumRefreshInterval,
}

impl IntervalParameter {
    /// Field name as it appears in configuration and options.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TargetRefreshInterval => "target_refresh_interval_ms",
            Self::MinimumRefreshInterval => "minimum_refresh_interval_ms",
        }
    }

    /// Whether the idle sentinel is an acceptable value.
    #[must_use]
    pub const fn accepts_idle(self) -> bool {
        matches!(self, Self::TargetRefreshInterval)
    }
}

impl fmt::Display for IntervalParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An interval was not a positive integer number of milliseconds.
///
/// Raised synchronously by the call that supplied the value (engine
/// construction or `subscribe`); the engine itself is unaffected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidIntervalError {
    parameter: IntervalParameter,
    value: f64,
}

impl InvalidIntervalError {
    /// Build an error for `value` supplied as `parameter`.
    #[must_use]
    pub const fn new(parameter: IntervalParameter, value: f64) -> Self {
        Self { parameter, value }
    }

    /// The parameter the bad value came from.
    #[must_use]
    pub const fn parameter(&self) -> IntervalParameter {
        self.parameter
    }

    /// The rejected value, unmodified.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }
}

impl fmt::Display for InvalidIntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected = if self.parameter.accepts_idle() {
            "a positive integer number of milliseconds or IDLE"
        } else {
            "a positive integer number of milliseconds"
        };
        write!(
            f,
            "invalid {}: expected {expected}, got {}",
            self.parameter, self.value
        )
    }
}

impl std::error::Error for InvalidIntervalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_parameter_and_value() {
        let err = InvalidIntervalError::new(IntervalParameter::MinimumRefreshInterval, -42.0);
        assert_eq!(
            err.to_string(),
            "invalid minimum_refresh_interval_ms: expected a positive integer number of \
             milliseconds, got -42"
        );
    }

    #[test]
    fn target_message_mentions_idle() {
        let err = InvalidIntervalError::new(IntervalParameter::TargetRefreshInterval, 470.53);
        let msg = err.to_string();
        assert!(msg.contains("target_refresh_interval_ms"));
        assert!(msg.contains("or IDLE"));
        assert!(msg.ends_with("got 470.53"));
    }

    #[test]
    fn special_values_render_verbatim() {
        let nan = InvalidIntervalError::new(IntervalParameter::TargetRefreshInterval, f64::NAN);
        assert!(nan.to_string().ends_with("got NaN"));
        let neg_inf =
            InvalidIntervalError::new(IntervalParameter::TargetRefreshInterval, f64::NEG_INFINITY);
        assert!(neg_inf.to_string().ends_with("got -inf"));
    }

    #[test]
    fn is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        let err = InvalidIntervalError::new(IntervalParameter::TargetRefreshInterval, 0.0);
        assert_error(&err);
        assert_eq!(err.parameter(), IntervalParameter::TargetRefreshInterval);
        assert_eq!(err.value(), 0.0);
    }
}
