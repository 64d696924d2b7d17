//! Watch expiry timing
//!
//! Pure functions that can be tested without a mailbox.

use chrono::{DateTime, Duration, Utc};

/// Check whether a watch expiring at `expires_at` has lapsed.
pub fn expired(expires_at: DateTime<Utc>) -> bool {
    expired_at(expires_at, Utc::now())
}

/// `expired` against an explicit clock
pub fn expired_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// Check whether a watch should be renewed now.
///
/// # Arguments
/// * `expires_at` - When the current watch lapses
/// * `margin_secs` - How long before expiry renewal becomes due
///
/// # Returns
/// `true` once fewer than `margin_secs` remain (or the watch already lapsed)
pub fn renewal_due(expires_at: DateTime<Utc>, margin_secs: u64) -> bool {
    renewal_due_at(expires_at, margin_secs, Utc::now())
}

/// `renewal_due` against an explicit clock
pub fn renewal_due_at(expires_at: DateTime<Utc>, margin_secs: u64, now: DateTime<Utc>) -> bool {
    let margin = i64::try_from(margin_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    expires_at - now <= margin
}

/// Time left before `expires_at`, or `None` once lapsed
pub fn time_remaining(expires_at: DateTime<Utc>) -> Option<Duration> {
    let left = expires_at - Utc::now();
    (left > Duration::zero()).then_some(left)
}
