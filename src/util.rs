/// Current unix time in seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current unix time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
