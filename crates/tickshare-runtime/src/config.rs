#![forbid(unsafe_code)]

//! Engine construction options.
//!
//! [`ClockConfig`] is plain data with public fields and `with_*` builders.
//! Nothing is validated until the engine is built, so a bad floor fails
//! `SharedClock::new` and never reaches the scheduler.
//!
//! # Sources
//!
//! - Code: `ClockConfig::default().with_minimum_refresh_interval_ms(500.0)`.
//! - Environment: [`ClockConfig::from_env`] reads `TICKSHARE_MIN_REFRESH_MS`
//!   and `TICKSHARE_AUTO_NOTIFY` on top of the defaults.
//! - Files (feature `config`): [`ClockConfig::from_toml_str`] and
//!   [`ClockConfig::from_json_str`]; missing fields take their defaults.
//!
//! ```toml
//! minimum_refresh_interval_ms = 1000
//! auto_notify_after_state_update = false
//! initial_date = 1710000000000
//! ```

use std::fmt;
use std::num::NonZeroU64;

use tickshare_core::{Instant, IntervalParameter, InvalidIntervalError, RefreshInterval};
use tickshare_core::warn;

use crate::notifier::NotifyMode;

/// Default floor for every requested interval, in milliseconds.
pub const DEFAULT_MINIMUM_REFRESH_INTERVAL_MS: f64 = 200.0;

/// Environment variable overriding the minimum refresh interval.
pub const ENV_MIN_REFRESH_MS: &str = "TICKSHARE_MIN_REFRESH_MS";

/// Environment variable overriding auto-notify (`1/true/yes/on` or
/// `0/false/no/off`).
pub const ENV_AUTO_NOTIFY: &str = "TICKSHARE_AUTO_NOTIFY";

/// Construction options for a shared clock.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default, deny_unknown_fields))]
pub struct ClockConfig {
    /// Initial snapshot. Default: the scheduler's current time.
    pub initial_date: Option<Instant>,

    /// Floor applied to every requested interval. Must be a positive
    /// integer. Default: 200ms.
    pub minimum_refresh_interval_ms: f64,

    /// Whether ticks notify subscribers directly. When false, ticks only
    /// refresh the snapshot and `flush` notifies. Default: true.
    pub auto_notify_after_state_update: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            initial_date: None,
            minimum_refresh_interval_ms: DEFAULT_MINIMUM_REFRESH_INTERVAL_MS,
            auto_notify_after_state_update: true,
        }
    }
}

impl ClockConfig {
    /// Set the initial snapshot.
    #[must_use]
    pub fn with_initial_date(mut self, initial_date: Instant) -> Self {
        self.initial_date = Some(initial_date);
        self
    }

    /// Set the minimum refresh interval.
    #[must_use]
    pub fn with_minimum_refresh_interval_ms(mut self, ms: f64) -> Self {
        self.minimum_refresh_interval_ms = ms;
        self
    }

    /// Enable or disable auto-notify.
    #[must_use]
    pub fn with_auto_notify(mut self, auto_notify: bool) -> Self {
        self.auto_notify_after_state_update = auto_notify;
        self
    }

    /// Validated floor.
    pub fn minimum_refresh_interval(&self) -> Result<NonZeroU64, InvalidIntervalError> {
        let value = self.minimum_refresh_interval_ms;
        match RefreshInterval::parse(value, IntervalParameter::MinimumRefreshInterval)? {
            RefreshInterval::Every(ms) => Ok(ms),
            RefreshInterval::Idle => Err(InvalidIntervalError::new(
                IntervalParameter::MinimumRefreshInterval,
                value,
            )),
        }
    }

    /// Notification mode selected by `auto_notify_after_state_update`.
    #[must_use]
    pub fn notify_mode(&self) -> NotifyMode {
        NotifyMode::from_auto_flag(self.auto_notify_after_state_update)
    }

    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through a custom environment lookup.
    ///
    /// Unparsable values are logged and ignored. A parsable but invalid
    /// interval is kept so that construction reports it.
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = get_env(ENV_MIN_REFRESH_MS) {
            match raw.trim().parse::<f64>() {
                Ok(ms) => config.minimum_refresh_interval_ms = ms,
                Err(_) => warn!(var = ENV_MIN_REFRESH_MS, value = %raw, "ignoring non-numeric value"),
            }
        }
        if let Some(raw) = get_env(ENV_AUTO_NOTIFY) {
            match parse_flag(&raw) {
                Some(flag) => config.auto_notify_after_state_update = flag,
                None => warn!(var = ENV_AUTO_NOTIFY, value = %raw, "ignoring non-boolean value"),
            }
        }
        config
    }

    /// Parse TOML, then validate the floor.
    #[cfg(feature = "config")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(ConfigError::Toml)?;
        config.validated()
    }

    /// Parse JSON, then validate the floor.
    #[cfg(feature = "config")]
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Json)?;
        config.validated()
    }

    #[cfg(feature = "config")]
    fn validated(self) -> Result<Self, ConfigError> {
        self.minimum_refresh_interval()
            .map_err(ConfigError::Interval)?;
        Ok(self)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Failure loading a [`ClockConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The TOML text was malformed.
    #[cfg(feature = "config")]
    Toml(toml::de::Error),
    /// The JSON text was malformed.
    #[cfg(feature = "config")]
    Json(serde_json::Error),
    /// The configured floor is not a positive integer.
    Interval(InvalidIntervalError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "config")]
            Self::Toml(err) => write!(f, "invalid TOML config: {err}"),
            #[cfg(feature = "config")]
            Self::Json(err) => write!(f, "invalid JSON config: {err}"),
            Self::Interval(err) => write!(f, "invalid config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "config")]
            Self::Toml(err) => Some(err),
            #[cfg(feature = "config")]
            Self::Json(err) => Some(err),
            Self::Interval(err) => Some(err),
        }
    }
}

impl From<InvalidIntervalError> for ConfigError {
    fn from(err: InvalidIntervalError) -> Self {
        Self::Interval(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClockConfig::default();
        assert_eq!(config.initial_date, None);
        assert_eq!(config.minimum_refresh_interval().map(NonZeroU64::get), Ok(200));
        assert_eq!(config.notify_mode(), NotifyMode::Auto);
    }

    #[test]
    fn builders() {
        let t = Instant::from_epoch_millis(5);
        let config = ClockConfig::default()
            .with_initial_date(t)
            .with_minimum_refresh_interval_ms(1_000.0)
            .with_auto_notify(false);
        assert_eq!(config.initial_date, Some(t));
        assert_eq!(config.minimum_refresh_interval().map(NonZeroU64::get), Ok(1_000));
        assert_eq!(config.notify_mode(), NotifyMode::Manual);
    }

    #[test]
    fn invalid_floor_names_value() {
        for bad in [f64::NAN, f64::NEG_INFINITY, 0.0, -42.0, 470.53, f64::INFINITY] {
            let err = ClockConfig::default()
                .with_minimum_refresh_interval_ms(bad)
                .minimum_refresh_interval()
                .unwrap_err();
            assert_eq!(err.parameter(), IntervalParameter::MinimumRefreshInterval);
            assert!(err.to_string().contains("minimum_refresh_interval_ms"));
            assert!(err.to_string().ends_with(&bad.to_string()));
        }
    }

    #[test]
    fn env_overrides() {
        let config = ClockConfig::from_env_with(env(&[
            (ENV_MIN_REFRESH_MS, " 750 "),
            (ENV_AUTO_NOTIFY, "off"),
        ]));
        assert_eq!(config.minimum_refresh_interval_ms, 750.0);
        assert!(!config.auto_notify_after_state_update);
    }

    #[test]
    fn env_garbage_is_ignored() {
        let config = ClockConfig::from_env_with(env(&[
            (ENV_MIN_REFRESH_MS, "fast"),
            (ENV_AUTO_NOTIFY, "maybe"),
        ]));
        assert_eq!(config, ClockConfig::default());
    }

    #[test]
    fn env_invalid_number_surfaces_at_validation() {
        let config = ClockConfig::from_env_with(env(&[(ENV_MIN_REFRESH_MS, "-42")]));
        assert!(config.minimum_refresh_interval().is_err());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::from(InvalidIntervalError::new(
            IntervalParameter::MinimumRefreshInterval,
            0.0,
        ));
        assert!(err.to_string().starts_with("invalid config: invalid minimum_refresh_interval_ms"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[cfg(feature = "config")]
    #[test]
    fn toml_round() {
        let config = ClockConfig::from_toml_str(
            "minimum_refresh_interval_ms = 1000\nauto_notify_after_state_update = false\n\
             initial_date = 1710000000000\n",
        )
        .expect("valid config");
        assert_eq!(config.minimum_refresh_interval_ms, 1_000.0);
        assert!(!config.auto_notify_after_state_update);
        assert_eq!(
            config.initial_date,
            Some(Instant::from_epoch_millis(1_710_000_000_000))
        );
    }

    #[cfg(feature = "config")]
    #[test]
    fn json_partial_uses_defaults() {
        let config = ClockConfig::from_json_str(r#"{"auto_notify_after_state_update": false}"#)
            .expect("valid config");
        assert_eq!(config.minimum_refresh_interval_ms, DEFAULT_MINIMUM_REFRESH_INTERVAL_MS);
        assert!(!config.auto_notify_after_state_update);
    }

    #[cfg(feature = "config")]
    #[test]
    fn file_config_rejects_bad_floor() {
        let err = ClockConfig::from_json_str(r#"{"minimum_refresh_interval_ms": 470.53}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Interval(_)));
        assert!(ClockConfig::from_toml_str("bogus = 1").is_err());
    }
}
