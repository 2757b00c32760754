//! Shared timestamp/run-id helpers for result envelopes and log records.

use chrono::{DateTime, Duration, Utc};
use ulid::Ulid;

/// RFC 3339 UTC timestamp (e.g. `2026-08-07T14:03:21.510023+00:00`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn new_run_id() -> String {
    Ulid::new().to_string()
}

/// Seconds elapsed since an RFC 3339 timestamp. `None` when the timestamp
/// does not parse, which callers treat as "age unknown".
pub fn age_seconds(ts: &str) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(ts).ok()?;
    Some(Utc::now().signed_duration_since(parsed).num_seconds())
}

/// RFC 3339 timestamp `minutes` from now, for scheduler next-run stamps.
pub fn rfc3339_in_minutes(minutes: u64) -> String {
    (Utc::now() + Duration::minutes(minutes as i64)).to_rfc3339()
}
