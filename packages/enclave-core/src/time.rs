//! Timestamps for wrapped-key records, directory entries and file metadata.
//!
//! Text timestamps use RFC 3339 in UTC with millisecond precision and a `Z`
//! suffix (`2024-05-01T12:34:56.789Z`), the format JavaScript's
//! `Date.prototype.toISOString()` emits.

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns the current time as an ISO 8601 string with millisecond precision.
pub fn now_iso8601() -> String {
    to_iso8601(Utc::now())
}

/// Formats a UTC instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn to_iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
