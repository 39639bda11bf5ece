use chrono::{DateTime, Utc};

pub fn time_millis() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_millis()
}

/// Milliseconds elapsed since `start`, a value returned by [`time_millis`].
pub fn millis_since(start: i64) -> i64 {
    (time_millis() - start).max(0)
}
