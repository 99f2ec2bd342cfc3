//! East-Coast time handling
//!
//! US betting feeds routinely emit wall-clock timestamps with no zone
//! marker. The business rule: a naive timestamp is East-Coast local time.
//! Conversion covers the EST/EDT switch (second Sunday of March, first
//! Sunday of November, both at 2am local).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};

use crate::error::{Result, SharplineError};

const EST: i32 = -5 * 3600;
const EDT: i32 = -4 * 3600;

/// Nth weekday of a month, e.g. the second Sunday of March.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + chrono::Duration::days((offset + (n - 1) * 7) as i64)
}

/// Whether a naive East-Coast timestamp falls in daylight time.
pub fn is_eastern_dst(naive: NaiveDateTime) -> bool {
    let year = naive.year();
    let spring = nth_weekday(year, 3, Weekday::Sun, 2)
        .and_hms_opt(2, 0, 0)
        .expect("valid spring-forward instant");
    let fall = nth_weekday(year, 11, Weekday::Sun, 1)
        .and_hms_opt(2, 0, 0)
        .expect("valid fall-back instant");
    naive >= spring && naive < fall
}

/// Offset in effect for a naive East-Coast timestamp.
pub fn eastern_offset(naive: NaiveDateTime) -> FixedOffset {
    let secs = if is_eastern_dst(naive) { EDT } else { EST };
    FixedOffset::east_opt(secs).expect("valid eastern offset")
}

/// Interpret a naive timestamp as East-Coast local and convert to UTC.
pub fn naive_east_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    eastern_offset(naive)
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive).fixed_offset())
        .with_timezone(&Utc)
}

/// East-Coast wall clock for a UTC instant.
pub fn utc_to_east(at: DateTime<Utc>) -> NaiveDateTime {
    // Determine DST from the provisional EST rendering; a conversion landing
    // inside the one-hour ambiguity resolves to standard time.
    let est_guess = at.with_timezone(&FixedOffset::east_opt(EST).expect("EST")).naive_local();
    let offset = eastern_offset(est_guess);
    at.with_timezone(&offset).naive_local()
}

/// Parse a feed timestamp: zone-aware strings convert to UTC directly,
/// naive strings are taken as East-Coast local.
pub fn parse_odds_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SharplineError::Parse("empty timestamp".into()));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive_east_to_utc(naive));
        }
    }

    Err(SharplineError::Parse(format!(
        "unparseable timestamp: {}",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dst_transition_dates_2025() {
        // 2025: spring forward March 9, fall back November 2
        let before = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(1, 59, 0)
            .unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        assert!(!is_eastern_dst(before));
        assert!(is_eastern_dst(after));

        let fall_before = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(1, 59, 0)
            .unwrap();
        let fall_after = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        assert!(is_eastern_dst(fall_before));
        assert!(!is_eastern_dst(fall_after));
    }

    #[test]
    fn test_naive_summer_timestamp_is_edt() {
        let naive = NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let utc = naive_east_to_utc(naive);
        assert_eq!(utc.to_rfc3339(), "2025-07-01T16:00:00+00:00");
    }

    #[test]
    fn test_naive_winter_timestamp_is_est() {
        let naive = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let utc = naive_east_to_utc(naive);
        assert_eq!(utc.to_rfc3339(), "2025-01-15T17:00:00+00:00");
    }

    #[test]
    fn test_parse_zone_aware_passthrough() {
        let parsed = parse_odds_timestamp("2025-05-01T12:00:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_naive_as_east() {
        let parsed = parse_odds_timestamp("2025-05-01 12:00:00").unwrap();
        // May 1 is EDT: noon East is 16:00 UTC
        assert_eq!(parsed.to_rfc3339(), "2025-05-01T16:00:00+00:00");
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(parse_odds_timestamp("last tuesday").is_err());
        assert!(parse_odds_timestamp("").is_err());
    }

    #[test]
    fn test_round_trip_across_dst() {
        // 6:30pm East on the fall-back day, after the switch
        let naive = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap();
        let utc = naive_east_to_utc(naive);
        assert_eq!(utc_to_east(utc), naive);
    }
}
