//! Tolerant timestamp parsing for provider payloads.
//!
//! Providers disagree on timestamp encoding: some send epoch seconds, some
//! epoch milliseconds, some ISO 8601 strings, and some numeric strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Epoch values above this are treated as milliseconds rather than seconds.
/// 1e12 seconds is the year 33658, so no real post crosses this as seconds.
const MS_THRESHOLD: i64 = 1_000_000_000_000;

/// Parses a timestamp from a JSON value of unknown shape.
///
/// Accepts integer epoch seconds or milliseconds, numeric strings of either,
/// RFC 3339 strings, `YYYY-MM-DD HH:MM:SS`, and bare dates. Returns `None`
/// for anything else, including non-positive epochs.
#[must_use]
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(from_epoch),
        serde_json::Value::String(s) => parse_string(s.trim()),
        _ => None,
    }
}

fn parse_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(epoch) = s.parse::<i64>() {
        return from_epoch(epoch);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch <= 0 {
        return None;
    }
    if epoch >= MS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_epoch_seconds() {
        let ts = parse_timestamp(&json!(1_700_000_000)).expect("seconds");
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_epoch_milliseconds() {
        let ts = parse_timestamp(&json!(1_700_000_000_123_i64)).expect("millis");
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn parses_numeric_strings() {
        let ts = parse_timestamp(&json!("1700000000")).expect("string seconds");
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_rfc3339_strings() {
        let ts = parse_timestamp(&json!("2024-06-01T12:30:00Z")).expect("rfc3339");
        assert_eq!(ts.to_rfc3339(), "2024-06-01T12:30:00+00:00");
    }

    #[test]
    fn parses_space_separated_and_date_only_strings() {
        let ts = parse_timestamp(&json!("2024-06-01 12:30:00")).expect("datetime");
        assert_eq!(ts.to_rfc3339(), "2024-06-01T12:30:00+00:00");

        let ts = parse_timestamp(&json!("2024-06-01")).expect("date");
        assert_eq!(ts.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp(&json!(0)).is_none());
        assert!(parse_timestamp(&json!(-5)).is_none());
        assert!(parse_timestamp(&json!("soon")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!({"ts": 1})).is_none());
    }
}
