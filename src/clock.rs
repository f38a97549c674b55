use time::OffsetDateTime;

/// Wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}

/// Wall clock in epoch seconds.
#[must_use]
pub fn now_seconds() -> u64 {
    now_millis() / 1000
}
