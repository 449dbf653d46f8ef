use std::time::Duration;

/// Tunables for media ingestion and session bookkeeping.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub media_timeout: Duration,
    pub throttle_step: Duration,
    pub throttle_window: Duration,
    pub session_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            media_timeout: Duration::from_secs(30),
            throttle_step: Duration::from_millis(500),
            throttle_window: Duration::from_secs(10),
            session_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("MEDIA_TIMEOUT_SECS") {
            cfg.media_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_u64("MEDIA_THROTTLE_STEP_MS") {
            cfg.throttle_step = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("MEDIA_THROTTLE_WINDOW_SECS") {
            cfg.throttle_window = Duration::from_secs(secs.max(1));
        }
        if let Some(hours) = env_u64("SESSION_WINDOW_HOURS") {
            cfg.session_window = Duration::from_secs(hours.max(1) * 3600);
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
