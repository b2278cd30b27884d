//! Compact monotonic time utilities.
//!
//! Uses a process-local monotonic clock so deadlines fit in a plain
//! `u64` (8 bytes vs 16 for `Option<Instant>`) and never jump with the
//! wall clock.

use std::sync::OnceLock;
use std::time::Instant;

/// Returns current monotonic time in milliseconds since process start.
#[inline]
pub fn now_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// Sentinel value meaning "no expiry".
pub const NO_EXPIRY: u64 = 0;

/// Converts a relative timeout in seconds (possibly negative) to an
/// absolute expiry timestamp.
///
/// Clamped away from zero so the result never collides with the
/// [`NO_EXPIRY`] sentinel; a non-positive timeout yields a deadline
/// that is already due.
#[inline]
pub fn expiry_after_secs(seconds: i64) -> u64 {
    now_ms()
        .saturating_add_signed(seconds.saturating_mul(1000))
        .max(1)
}

/// Returns remaining whole seconds until `expires_at_ms`, or `None`
/// without an expiry. Past deadlines report zero.
#[inline]
pub fn remaining_secs(expires_at_ms: u64) -> Option<u64> {
    if expires_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expires_at_ms.saturating_sub(now_ms()) / 1000)
    }
}
