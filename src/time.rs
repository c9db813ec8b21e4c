//! Time utilities.
//!
//! Card timestamps are Unix seconds, matching what the directory stores.

use chrono::{DateTime, TimeZone, Utc};

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts a Unix timestamp in seconds to a UTC date, if it is in range.
pub fn to_datetime(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}
