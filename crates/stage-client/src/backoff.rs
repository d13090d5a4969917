//! Reconnect backoff shared by viewers and broadcasters.

use std::time::Duration;

pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// `min(30s, 2^retry_count * 1s)`.
///
/// The controller increments its retry count before asking for a delay, so
/// the first scheduled retry waits 2s.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count);
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}
