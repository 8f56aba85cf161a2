//! Predefined query and retention windows.

use chrono::Duration as ChronoDuration;

use super::DataError;

/// A lookback window selected by an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    /// The largest supported window. Retention keeps exactly this much history.
    pub const MAX: TimeRange = TimeRange::Year;

    /// Resolve a range code. Unknown codes are rejected, never defaulted.
    pub fn from_code(code: i64) -> Result<Self, DataError> {
        match code {
            1 => Ok(TimeRange::Day),
            2 => Ok(TimeRange::Week),
            3 => Ok(TimeRange::Month),
            4 => Ok(TimeRange::Year),
            other => Err(DataError::InvalidArgument(format!(
                "unknown time range code: {}",
                other
            ))),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            TimeRange::Day => 1,
            TimeRange::Week => 2,
            TimeRange::Month => 3,
            TimeRange::Year => 4,
        }
    }

    pub fn duration(self) -> ChronoDuration {
        match self {
            TimeRange::Day => ChronoDuration::days(1),
            TimeRange::Week => ChronoDuration::days(7),
            TimeRange::Month => ChronoDuration::days(30),
            TimeRange::Year => ChronoDuration::days(365),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TimeRange; 4] = [TimeRange::Day, TimeRange::Week, TimeRange::Month, TimeRange::Year];

    #[test]
    fn test_codes_roundtrip() {
        for range in ALL {
            assert_eq!(TimeRange::from_code(range.code()).unwrap(), range);
        }
    }

    #[test]
    fn test_unknown_code_fails_closed() {
        assert!(matches!(TimeRange::from_code(0), Err(DataError::InvalidArgument(_))));
        assert!(matches!(TimeRange::from_code(5), Err(DataError::InvalidArgument(_))));
        assert!(matches!(TimeRange::from_code(-1), Err(DataError::InvalidArgument(_))));
    }

    #[test]
    fn test_max_is_largest_window() {
        for range in ALL {
            assert!(range.duration() <= TimeRange::MAX.duration());
        }
        assert_eq!(TimeRange::Day.duration(), ChronoDuration::hours(24));
    }
}
