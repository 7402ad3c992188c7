//! Exponential backoff for sequential recovery and the fix loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delay after failed attempt `attempt` (1-indexed): `unit * 2^attempt`.
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

/// Run `op` up to `max_attempts` times, sleeping `unit * 2^i` after failed
/// attempt `i`.
///
/// `op` receives the 1-indexed attempt number. A `max_attempts` of zero is
/// treated as one. Once the attempts are used up the last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    unit: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = backoff_delay(unit, attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
