//! Channel registry loaded from YAML.
//!
//! ```yaml
//! channels:
//!   - token: chan-token
//!     workspace_id: ws-1
//!     api_key: secret
//!     block_inbound_attendance: false
//! ```

use std::{fs, path::Path};

use anyhow::{Context, Result};
use gup_core::{ChannelConfig, memory::MemoryChannelConfigStore};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
struct ChannelsFile {
    #[serde(default)]
    channels: Vec<ChannelConfig>,
}

pub fn parse_channels(raw: &str) -> Result<Vec<ChannelConfig>> {
    let file: ChannelsFile = serde_yaml_bw::from_str(raw).context("parse channels config")?;
    Ok(file.channels)
}

/// Loads the registry. A missing file yields an empty registry, so every
/// webhook is dropped as unknown until channels are configured.
pub fn load_channels(path: impl AsRef<Path>) -> Result<MemoryChannelConfigStore> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "channels config not found; no channel is registered");
        return Ok(MemoryChannelConfigStore::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read channels config {}", path.display()))?;
    let channels =
        parse_channels(&raw).with_context(|| format!("load channels config {}", path.display()))?;
    info!(path = %path.display(), count = channels.len(), "channels loaded");
    Ok(MemoryChannelConfigStore::new(channels))
}
