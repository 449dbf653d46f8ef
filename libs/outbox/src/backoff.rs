use std::time::Duration;

use uuid::Uuid;

/// Exponential delay with jitter for the `attempt`-th retry, capped at `max`.
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let pow = attempt.min(16); // prevent overflow
    let capped = base_ms.saturating_mul(1u64 << pow).min(max_ms);
    let jitter_source = Uuid::new_v4().as_u128();
    let jitter = if capped == 0 {
        0
    } else {
        (jitter_source % (capped as u128)) as u64
    };
    Duration::from_millis(capped.saturating_add(jitter).min(max_ms))
}
