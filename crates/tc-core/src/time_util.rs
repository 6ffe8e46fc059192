//! Time utilities — epoch timestamps and ISO-8601 formatting.
//!
//! Persisted ledger records carry `chrono::DateTime<Utc>` fields which
//! serialize to ISO-8601 via serde. The helpers here cover the remaining
//! cases: millisecond timestamps for signed exchange requests and elapsed
//! wall-clock arithmetic.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_millis() as u64
}

/// Format a UTC timestamp as an ISO-8601 string with second precision.
#[inline]
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Elapsed seconds between two timestamps (`later - earlier`), as f64.
#[inline]
pub fn elapsed_secs(earlier: &DateTime<Utc>, later: &DateTime<Utc>) -> f64 {
    (*later - *earlier).num_milliseconds() as f64 / 1000.0
}
