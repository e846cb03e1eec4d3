//! Date-literal and relative-duration parsing.
//!
//! All timestamps are milliseconds since the Unix epoch, UTC. Relative
//! units use fixed 30-day months and 365-day years; calendar arithmetic
//! would make pagination orderings depend on the local timezone.

use chrono::{DateTime, NaiveDate};

/// Milliseconds in one hour.
const HOUR_MS: f64 = 3_600_000.0;

/// A relative-duration unit (`h`, `d`, `w`, `m`, `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl RelUnit {
    /// Parses the single-letter unit suffix.
    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'h' => Some(Self::Hours),
            'd' => Some(Self::Days),
            'w' => Some(Self::Weeks),
            'm' => Some(Self::Months),
            'y' => Some(Self::Years),
            _ => None,
        }
    }

    /// Milliseconds per unit.
    pub fn ms(&self) -> f64 {
        match self {
            Self::Hours => HOUR_MS,
            Self::Days => 24.0 * HOUR_MS,
            Self::Weeks => 7.0 * 24.0 * HOUR_MS,
            Self::Months => 30.0 * 24.0 * HOUR_MS,
            Self::Years => 365.0 * 24.0 * HOUR_MS,
        }
    }

    /// The suffix character.
    pub fn suffix(&self) -> char {
        match self {
            Self::Hours => 'h',
            Self::Days => 'd',
            Self::Weeks => 'w',
            Self::Months => 'm',
            Self::Years => 'y',
        }
    }
}

/// Parses a date literal to epoch milliseconds.
///
/// Accepts `YYYY-MM-DD` (midnight UTC) and RFC 3339 timestamps.
pub fn parse_date_ms(s: &str) -> Option<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
        return Some(dt.timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Parses a relative duration of the form `<n><unit>`, e.g. `7d`, `12h`.
///
/// The amount may carry a decimal point; it must be non-negative.
pub fn parse_relative(s: &str) -> Option<(f64, RelUnit)> {
    let mut chars = s.chars();
    let unit = RelUnit::from_suffix(chars.next_back()?)?;
    let amount_str = chars.as_str();
    if amount_str.is_empty() {
        return None;
    }
    if !amount_str
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }
    let amount: f64 = amount_str.parse().ok()?;
    Some((amount, unit))
}

/// Converts a relative duration to milliseconds.
pub fn relative_ms(amount: f64, unit: RelUnit) -> i64 {
    (amount * unit.ms()) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_dates() {
        assert_eq!(parse_date_ms("1970-01-01"), Some(0));
        assert_eq!(parse_date_ms("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_date_ms("2025-01-01"), Some(1_735_689_600_000));
    }

    #[test]
    fn rfc3339_timestamps() {
        assert_eq!(parse_date_ms("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(
            parse_date_ms("1970-01-01T01:00:00+01:00"),
            Some(0),
            "offset respected"
        );
    }

    #[test]
    fn garbage_rejected() {
        for s in ["", "hello", "2025-13-01", "01/02/2025", "7d"] {
            assert_eq!(parse_date_ms(s), None, "accepted {s:?}");
        }
    }

    #[test]
    fn relative_durations() {
        assert_eq!(parse_relative("1h"), Some((1.0, RelUnit::Hours)));
        assert_eq!(parse_relative("7d"), Some((7.0, RelUnit::Days)));
        assert_eq!(parse_relative("2w"), Some((2.0, RelUnit::Weeks)));
        assert_eq!(parse_relative("3m"), Some((3.0, RelUnit::Months)));
        assert_eq!(parse_relative("1y"), Some((1.0, RelUnit::Years)));
        assert_eq!(parse_relative("1.5d"), Some((1.5, RelUnit::Days)));
    }

    #[test]
    fn relative_rejects_non_durations() {
        for s in ["d", "7x", "-1d", "7", "abc", ""] {
            assert_eq!(parse_relative(s), None, "accepted {s:?}");
        }
    }

    #[test]
    fn fixed_unit_arithmetic() {
        assert_eq!(relative_ms(1.0, RelUnit::Hours), 3_600_000);
        assert_eq!(relative_ms(1.0, RelUnit::Days), 86_400_000);
        assert_eq!(relative_ms(1.0, RelUnit::Weeks), 7 * 86_400_000);
        assert_eq!(relative_ms(1.0, RelUnit::Months), 30 * 86_400_000);
        assert_eq!(relative_ms(1.0, RelUnit::Years), 365 * 86_400_000);
    }
}
