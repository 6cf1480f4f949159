#![forbid(unsafe_code)]

//! Read-only point-in-time values.
//!
//! [`Instant`] is the snapshot type handed to every subscriber. It wraps a
//! signed count of milliseconds since the Unix epoch (UTC) and exposes the
//! usual calendar accessors, but it has no mutators: a "changed" time is
//! always a new value. When a caller genuinely needs a mutable date, it asks
//! for one explicitly with [`Instant::to_offset_date_time`] or
//! [`Instant::to_system_time`].
//!
//! # Range
//!
//! Values are clamped to the calendar range supported by the `time` crate
//! (years -9999 through 9999) so the accessors are total.

use std::fmt;

use time::OffsetDateTime;
use time::formatting::Formattable;
use web_time::{Duration, SystemTime, UNIX_EPOCH};

/// `-9999-01-01T00:00:00.000Z`.
const MIN_EPOCH_MILLIS: i64 = -377_705_116_800_000;

/// `9999-12-31T23:59:59.999Z`.
const MAX_EPOCH_MILLIS: i64 = 253_402_300_799_999;

/// An immutable instant, stored as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "i64", into = "i64"))]
pub struct Instant {
    epoch_ms: i64,
}

impl Instant {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Self = Self { epoch_ms: 0 };

    /// Create an instant from milliseconds since the Unix epoch.
    ///
    /// Out-of-range values are clamped to the supported calendar range.
    #[must_use]
    pub const fn from_epoch_millis(epoch_ms: i64) -> Self {
        let epoch_ms = if epoch_ms < MIN_EPOCH_MILLIS {
            MIN_EPOCH_MILLIS
        } else if epoch_ms > MAX_EPOCH_MILLIS {
            MAX_EPOCH_MILLIS
        } else {
            epoch_ms
        };
        Self { epoch_ms }
    }

    /// Capture the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock reading, truncating to whole milliseconds.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let epoch_ms = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
            Err(err) => i64::try_from(err.duration().as_millis())
                .map(|ms| -ms)
                .unwrap_or(i64::MIN),
        };
        Self::from_epoch_millis(epoch_ms)
    }

    /// Milliseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn epoch_millis(self) -> i64 {
        self.epoch_ms
    }

    /// A new instant `ms` milliseconds later (or earlier, if negative).
    #[inline]
    #[must_use]
    pub const fn saturating_add_millis(self, ms: i64) -> Self {
        Self::from_epoch_millis(self.epoch_ms.saturating_add(ms))
    }

    /// Signed milliseconds from `earlier` to `self`.
    #[inline]
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        self.epoch_ms.saturating_sub(earlier.epoch_ms)
    }

    /// Calendar year (UTC).
    #[must_use]
    pub fn year(self) -> i32 {
        self.to_offset_date_time().year()
    }

    /// Month of the year, 1 through 12 (UTC).
    #[must_use]
    pub fn month(self) -> u8 {
        u8::from(self.to_offset_date_time().month())
    }

    /// Day of the month, 1 through 31 (UTC).
    #[must_use]
    pub fn day(self) -> u8 {
        self.to_offset_date_time().day()
    }

    /// Hour of the day, 0 through 23 (UTC).
    #[must_use]
    pub fn hour(self) -> u8 {
        self.to_offset_date_time().hour()
    }

    /// Minute of the hour (UTC).
    #[must_use]
    pub fn minute(self) -> u8 {
        self.to_offset_date_time().minute()
    }

    /// Second of the minute (UTC).
    #[must_use]
    pub fn second(self) -> u8 {
        self.to_offset_date_time().second()
    }

    /// Millisecond of the second.
    #[must_use]
    pub fn millisecond(self) -> u16 {
        self.to_offset_date_time().millisecond()
    }

    /// Day of the week (UTC).
    #[must_use]
    pub fn weekday(self) -> time::Weekday {
        self.to_offset_date_time().weekday()
    }

    /// An owned, freely mutable UTC date-time equal to this instant.
    #[must_use]
    pub fn to_offset_date_time(self) -> OffsetDateTime {
        let nanos = i128::from(self.epoch_ms) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// An owned wall-clock value equal to this instant.
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let magnitude = Duration::from_millis(self.epoch_ms.unsigned_abs());
        if self.epoch_ms >= 0 {
            UNIX_EPOCH + magnitude
        } else {
            UNIX_EPOCH - magnitude
        }
    }

    /// Format with any `time` format description.
    pub fn format(self, format: &(impl Formattable + ?Sized)) -> Result<String, time::error::Format> {
        self.to_offset_date_time().format(format)
    }
}

impl Default for Instant {
    fn default() -> Self {
        Self::UNIX_EPOCH
    }
}

impl From<i64> for Instant {
    fn from(epoch_ms: i64) -> Self {
        Self::from_epoch_millis(epoch_ms)
    }
}

impl From<Instant> for i64 {
    fn from(instant: Instant) -> Self {
        instant.epoch_ms
    }
}

/// ISO 8601 in UTC with millisecond precision, e.g. `2024-03-09T16:05:00.250Z`.
/// Years outside 0..=9999 use the signed six-digit extended form.
impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = self.to_offset_date_time();
        let year = dt.year();
        if (0..=9999).contains(&year) {
            write!(f, "{year:04}")?;
        } else {
            write!(f, "{year:+07}")?;
        }
        write!(
            f,
            "-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.millisecond()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::Weekday;
    use time::format_description::well_known::Rfc3339;

    // 2024-03-09T16:05:07.250Z
    const SAMPLE_MS: i64 = 1_710_000_307_250;

    #[test]
    fn calendar_accessors() {
        let t = Instant::from_epoch_millis(SAMPLE_MS);
        assert_eq!(t.year(), 2024);
        assert_eq!(t.month(), 3);
        assert_eq!(t.day(), 9);
        assert_eq!(t.hour(), 16);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.second(), 7);
        assert_eq!(t.millisecond(), 250);
        assert_eq!(t.weekday(), Weekday::Saturday);
    }

    #[test]
    fn display_is_iso8601_millis() {
        assert_eq!(
            Instant::from_epoch_millis(SAMPLE_MS).to_string(),
            "2024-03-09T16:05:07.250Z"
        );
        assert_eq!(Instant::UNIX_EPOCH.to_string(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn display_pre_epoch() {
        assert_eq!(
            Instant::from_epoch_millis(-1).to_string(),
            "1969-12-31T23:59:59.999Z"
        );
    }

    #[test]
    fn display_extended_year() {
        let t = Instant::from_epoch_millis(MIN_EPOCH_MILLIS);
        assert_eq!(t.to_string(), "-009999-01-01T00:00:00.000Z");
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(
            Instant::from_epoch_millis(i64::MAX).epoch_millis(),
            MAX_EPOCH_MILLIS
        );
        assert_eq!(
            Instant::from_epoch_millis(i64::MIN).epoch_millis(),
            MIN_EPOCH_MILLIS
        );
        assert_eq!(Instant::from_epoch_millis(i64::MAX).year(), 9999);
    }

    #[test]
    fn arithmetic_returns_new_values() {
        let t = Instant::from_epoch_millis(1_000);
        let later = t.saturating_add_millis(500);
        assert_eq!(t.epoch_millis(), 1_000);
        assert_eq!(later.epoch_millis(), 1_500);
        assert_eq!(later.millis_since(t), 500);
        assert_eq!(t.millis_since(later), -500);
        assert!(t < later);
    }

    #[test]
    fn mutable_copy_is_detached() {
        let t = Instant::from_epoch_millis(SAMPLE_MS);
        let mut copy = t.to_offset_date_time();
        copy += time::Duration::hours(1);
        assert_eq!(copy.hour(), 17);
        assert_eq!(t.hour(), 16);
    }

    #[test]
    fn system_time_conversion() {
        let t = Instant::from_epoch_millis(-2_500);
        assert_eq!(Instant::from_system_time(t.to_system_time()), t);
        let u = Instant::from_epoch_millis(SAMPLE_MS);
        assert_eq!(Instant::from_system_time(u.to_system_time()), u);
    }

    #[test]
    fn format_with_description() {
        let t = Instant::from_epoch_millis(SAMPLE_MS);
        let text = t.format(&Rfc3339).expect("rfc3339 formats in-range years");
        assert!(text.starts_with("2024-03-09T16:05:07.25"));
    }

    #[test]
    fn now_is_after_2020() {
        assert!(Instant::now().year() >= 2020);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_epoch_millis() {
        let t = Instant::from_epoch_millis(SAMPLE_MS);
        assert_eq!(serde_json::to_string(&t).expect("serializes"), "1710000307250");
        let back: Instant = serde_json::from_str("-1").expect("deserializes");
        assert_eq!(back, Instant::from_epoch_millis(-1));
        let clamped: Instant = serde_json::from_str("9223372036854775807").expect("deserializes");
        assert_eq!(clamped.epoch_millis(), MAX_EPOCH_MILLIS);
    }

    proptest! {
        #[test]
        fn epoch_millis_round_trip(ms in MIN_EPOCH_MILLIS..=MAX_EPOCH_MILLIS) {
            let t = Instant::from_epoch_millis(ms);
            prop_assert_eq!(t.epoch_millis(), ms);
            let dt = t.to_offset_date_time();
            prop_assert_eq!(dt.unix_timestamp_nanos() / 1_000_000, i128::from(ms));
        }
    }
}
