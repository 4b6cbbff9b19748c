//! Time window arithmetic for rate limiting.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Granularity of a rate limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
}

impl TimeWindow {
    /// Windows in the order they are evaluated.
    pub const ALL: [TimeWindow; 2] = [TimeWindow::Minute, TimeWindow::Hour];

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
        }
    }

    /// Window length as a signed chrono delta, for timestamp arithmetic.
    pub fn delta(&self) -> TimeDelta {
        match self {
            TimeWindow::Minute => TimeDelta::seconds(60),
            TimeWindow::Hour => TimeDelta::seconds(3600),
        }
    }

    /// Lowercase name used in store keys and messages.
    pub fn name(&self) -> &'static str {
        match self {
            TimeWindow::Minute => "minute",
            TimeWindow::Hour => "hour",
        }
    }

    /// Bucket label for the window containing `now`.
    ///
    /// `YYYYMMDDHHmm` for minutes and `YYYYMMDDHH` for hours. All instants of
    /// the same window share a label.
    pub fn bucket(&self, now: DateTime<Utc>) -> String {
        match self {
            TimeWindow::Minute => now.format("%Y%m%d%H%M").to_string(),
            TimeWindow::Hour => now.format("%Y%m%d%H").to_string(),
        }
    }

    /// Start of the window containing `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let period = self.duration().as_secs() as i64;
        let secs = now.timestamp();
        let start = secs - secs.rem_euclid(period);
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }

    /// First instant after the window containing `now`.
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now) + self.delta()
    }

    /// Time left until the window containing `now` rolls over.
    pub fn until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.window_end(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_bucket_labels() {
        let now = at(14, 7, 42);
        assert_eq!(TimeWindow::Minute.bucket(now), "202403091407");
        assert_eq!(TimeWindow::Hour.bucket(now), "2024030914");
    }

    #[test]
    fn test_bucket_changes_at_boundary() {
        let before = at(14, 7, 59);
        let after = at(14, 8, 0);
        assert_ne!(TimeWindow::Minute.bucket(before), TimeWindow::Minute.bucket(after));
        assert_eq!(TimeWindow::Hour.bucket(before), TimeWindow::Hour.bucket(after));
    }

    #[test]
    fn test_window_start_and_end() {
        let now = at(14, 7, 42);
        assert_eq!(TimeWindow::Minute.window_start(now), at(14, 7, 0));
        assert_eq!(TimeWindow::Minute.window_end(now), at(14, 8, 0));
        assert_eq!(TimeWindow::Hour.window_start(now), at(14, 0, 0));
        assert_eq!(TimeWindow::Hour.window_end(now), at(15, 0, 0));
    }

    #[test]
    fn test_until_reset() {
        let now = at(14, 7, 42);
        assert_eq!(TimeWindow::Minute.until_reset(now), Duration::from_secs(18));
        assert_eq!(
            TimeWindow::Hour.until_reset(now),
            Duration::from_secs(52 * 60 + 18)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeWindow::Minute.to_string(), "minute");
        assert_eq!(TimeWindow::Hour.to_string(), "hour");
    }
}
