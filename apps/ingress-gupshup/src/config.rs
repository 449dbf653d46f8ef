use std::net::SocketAddr;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub bind: SocketAddr,
    pub nats_url: Option<String>,
    pub redis_url: Option<String>,
    pub channels_path: String,
    pub upload_base_url: Option<String>,
    pub cache_namespace: String,
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl IngressConfig {
    pub fn from_env() -> Result<Self> {
        let bind = std::env::var("BIND").unwrap_or_else(|_| "0.0.0.0:8088".into());
        let bind = bind
            .parse()
            .with_context(|| format!("invalid BIND address {bind}"))?;
        Ok(Self {
            bind,
            nats_url: non_empty("NATS_URL"),
            redis_url: non_empty("REDIS_URL"),
            channels_path: non_empty("GUPSHUP_CHANNELS_PATH")
                .unwrap_or_else(|| "channels.yaml".into()),
            upload_base_url: non_empty("UPLOAD_BASE_URL"),
            cache_namespace: non_empty("CACHE_NAMESPACE").unwrap_or_else(|| "gupshup".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_and_blank_values_are_unset() {
        unsafe {
            std::env::remove_var("BIND");
            std::env::set_var("NATS_URL", "  ");
            std::env::remove_var("GUPSHUP_CHANNELS_PATH");
        }
        let config = IngressConfig::from_env().unwrap();
        assert_eq!(config.bind.port(), 8088);
        assert!(config.nats_url.is_none());
        assert_eq!(config.channels_path, "channels.yaml");
        unsafe {
            std::env::remove_var("NATS_URL");
        }
    }
}
