//! Reconnect backoff policy.

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based): the base doubled per
/// failed attempt, capped.
pub fn delay_for_attempt(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let doublings = attempt.saturating_sub(1).min(31);
    base.checked_mul(1_u32 << doublings)
        .map_or(cap, |delay| delay.min(cap))
}
