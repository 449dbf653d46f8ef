use std::time::Duration;

use anyhow::Result;
use gup_core::SharedCache;
use tracing::debug;

/// Spaces out media downloads per sender: the n-th fetch inside the window
/// waits `(n - 1) * step`.
#[derive(Clone)]
pub struct MediaThrottle {
    cache: SharedCache,
    step: Duration,
    window: Duration,
}

impl MediaThrottle {
    pub fn new(cache: SharedCache, step: Duration, window: Duration) -> Self {
        Self {
            cache,
            step,
            window,
        }
    }

    pub fn key(phone: &str) -> String {
        format!("media-throttle:{phone}")
    }

    pub async fn delay_for(&self, phone: &str) -> Result<Duration> {
        let count = self.cache.incr(&Self::key(phone), self.window).await?;
        let waits = (count - 1).clamp(0, i64::from(u32::MAX)) as u32;
        Ok(self.step.saturating_mul(waits))
    }

    /// Sleeps for this sender's slot and returns the delay applied.
    pub async fn wait(&self, phone: &str) -> Result<Duration> {
        let delay = self.delay_for(phone).await?;
        if !delay.is_zero() {
            debug!(phone, delay_ms = delay.as_millis() as u64, "throttling media fetch");
            tokio::time::sleep(delay).await;
        }
        Ok(delay)
    }
}
