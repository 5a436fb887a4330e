use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds; clamps to zero for a pre-epoch clock.
pub(crate) fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
