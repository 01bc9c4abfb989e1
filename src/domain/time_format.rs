// Timestamp display helpers
use chrono::{DateTime, SecondsFormat, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Convert unix seconds (fractional allowed) to a UTC instant
pub fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

/// RFC 3339 / ISO-8601 instant with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`
pub fn to_iso(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Calendar date and time, e.g. `2024-01-01 12:30:00`
pub fn format_date_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Calendar date only, e.g. `2024-01-01`
pub fn format_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

/// Human-readable age of `timestamp` relative to `now`.
///
/// Under a minute reads "just now"; up to a week is expressed in the largest
/// whole unit ("3 minutes ago", "1 hour ago", "2 days ago"); anything older
/// falls back to the calendar date. Timestamps in the future read "just now".
pub fn relative_age(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let age = now.signed_duration_since(*timestamp).num_seconds();

    if age < MINUTE {
        "just now".to_string()
    } else if age < HOUR {
        plural(age / MINUTE, "minute")
    } else if age < DAY {
        plural(age / HOUR, "hour")
    } else if age < WEEK {
        plural(age / DAY, "day")
    } else {
        format_date(timestamp)
    }
}

/// Relative age for an ISO string; empty input means nothing was received yet.
pub fn relative_age_text(iso: &str, now: &DateTime<Utc>) -> String {
    if iso.is_empty() {
        return "never".to_string();
    }
    match parse_iso(iso) {
        Some(timestamp) => relative_age(&timestamp, now),
        None => iso.to_string(),
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}
