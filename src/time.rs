/// Time utilities.
///
/// Client-side timestamps (member seed values, cache entries) come from
/// these helpers; store commit timestamps are assigned by the store itself
/// and are additionally monotonic. See `store::Timestamp`.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns the current Unix timestamp in microseconds.
pub fn now_timestamp_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
