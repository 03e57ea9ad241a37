use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since 1970-01-01. Drives the last-seen stamps and the
/// rate-limit window arithmetic; a clock stepped to before the epoch reads
/// as zero, and window comparisons must saturate rather than assume the
/// value is monotone.
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// The same clock truncated to the u32 seconds field carried in message
/// frames.
#[inline]
pub fn wire_timestamp() -> u32 {
    timestamp_secs() as u32
}
