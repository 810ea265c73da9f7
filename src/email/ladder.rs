//! Retry backoff ladder for failed deliveries.

use chrono::Duration;

/// Delay before the next attempt, indexed by failed attempts so far
pub const RETRY_LADDER_MINUTES: [i64; 5] = [1, 5, 15, 60, 120];

/// Delay before retrying a message that has failed `attempts` times.
///
/// Counts beyond the ladder clamp to its last rung.
pub fn retry_delay_for(attempts: u32) -> Duration {
    let index = (attempts.max(1) as usize - 1).min(RETRY_LADDER_MINUTES.len() - 1);
    Duration::minutes(RETRY_LADDER_MINUTES[index])
}
