//! Retry delay after a failed send.

/// Milliseconds per minute.
const MINUTE_MS: u64 = 60_000;

/// Delay in minutes before the next attempt, given the number of failed
/// attempts so far (already incremented): `min(2^attempts, cap_minutes)`.
///
/// Monotonic non-decreasing in `attempts`; shifts that overflow saturate to
/// the cap.
pub fn backoff_minutes(attempts: u32, cap_minutes: u64) -> u64 {
    1u64.checked_shl(attempts)
        .unwrap_or(u64::MAX)
        .min(cap_minutes)
}

/// Epoch-ms due time for the next attempt.
pub fn next_due_at(now: i64, attempts: u32, cap_minutes: u64) -> i64 {
    let delay_ms = backoff_minutes(attempts, cap_minutes).saturating_mul(MINUTE_MS);
    now.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX))
}
