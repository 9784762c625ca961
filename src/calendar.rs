use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};

use crate::model::{DAY_MS, DateRange, Ms, Span};

/// Calendar-day arithmetic in one fixed UTC offset. Every organization
/// shares the offset configured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// `None` when the offset is outside ±24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    fn offset_ms(&self) -> Ms {
        self.offset.local_minus_utc() as Ms * 1000
    }

    /// Instant at which `date` begins.
    pub fn day_start(&self, date: NaiveDate) -> Ms {
        date.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - self.offset_ms()
    }

    /// `[00:00, 24:00)` of `date`.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.day_start(date);
        Span::new(start, start + DAY_MS)
    }

    /// Calendar date containing the instant `t`.
    pub fn date_of(&self, t: Ms) -> NaiveDate {
        DateTime::from_timestamp_millis(t + self.offset_ms())
            .map(|dt| dt.date_naive())
            .unwrap_or(NaiveDate::MIN)
    }

    /// `[start_date 00:00, end_date 24:00)`.
    pub fn range_span(&self, range: &DateRange) -> Span {
        Span::new(self.day_start(range.start), self.day_start(range.end) + DAY_MS)
    }

    /// Every date of the range, ascending.
    pub fn dates(range: &DateRange) -> impl Iterator<Item = NaiveDate> {
        let end = range.end;
        range.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Parse a timestamp literal: Unix milliseconds, RFC 3339, a naive
/// `YYYY-MM-DD[ T]HH:MM[:SS]` (read as UTC) or a bare date (UTC midnight).
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc().timestamp_millis());
        }
    }
    parse_date(s).map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
