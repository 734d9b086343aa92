// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Layout of timestamps stored in table cells.
pub const CELL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a UTC timestamp for a table cell.
pub fn format_cell_timestamp(date: DateTime<Utc>) -> String {
    date.format(CELL_TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp as returned by the AWeber API.
pub fn parse_api_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_cell_timestamp(raw))
}

/// Parse a timestamp read back from a table cell.
///
/// Accepts the cell layout, RFC3339, a bare `YYYY-MM-DD` date and the
/// `M/D/YYYY` dates written by older versions of the broadcast table.
pub fn parse_cell_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, CELL_TIMESTAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// First instant of the given calendar month (UTC).
pub fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The calendar month `offset` months away from (`year`, `month`).
pub fn shift_month(year: i32, month: u32, offset: i32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 + offset;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Whole calendar months from `earlier`'s month to `later`'s month.
///
/// Same month is 0; negative when `earlier` is actually later.
pub fn months_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i32 {
    (later.year() - earlier.year()) * 12 + later.month() as i32 - earlier.month() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_timestamps_round_trip_to_the_second() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 15, 4, 5).unwrap();
        let cell = format_cell_timestamp(ts);
        assert_eq!(cell, "2024-03-01 15:04:05");
        assert_eq!(parse_cell_timestamp(&cell), Some(ts));
    }

    #[test]
    fn api_timestamps_are_normalized_to_utc() {
        let parsed = parse_api_timestamp("2024-03-01T10:00:00-05:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn legacy_cell_dates_are_accepted() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_cell_timestamp("3/1/2024"), Some(expected));
        assert_eq!(parse_cell_timestamp("2024-03-01"), Some(expected));
        assert_eq!(parse_cell_timestamp("not a date"), None);
        assert_eq!(parse_cell_timestamp(""), None);
    }

    #[test]
    fn shift_month_crosses_year_boundaries() {
        assert_eq!(shift_month(2024, 1, -1), (2023, 12));
        assert_eq!(shift_month(2024, 12, 1), (2025, 1));
        assert_eq!(shift_month(2024, 3, -14), (2023, 1));
        assert_eq!(shift_month(2024, 3, 0), (2024, 3));
    }

    #[test]
    fn months_between_counts_calendar_months() {
        let a = Utc.with_ymd_and_hms(2023, 11, 30, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(months_between(a, b), 3);
        assert_eq!(months_between(b, b), 0);
    }
}
