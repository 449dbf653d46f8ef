//! Attachment storage backends for re-uploaded media.

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use gup_core::AttachmentUploader;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Stores attachments with `PUT <base>/<name>` and returns the object URL.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn object_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}

#[async_trait]
impl AttachmentUploader for HttpUploader {
    async fn upload(&self, buffer: Bytes, name: &str, mime_type: &str) -> Result<String> {
        let url = self.object_url(name);
        let size = buffer.len();
        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, mime_type)
            .body(buffer)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("upload to {url} returned {status}");
        }
        debug!(url = %url, size, mime_type, "attachment uploaded");
        Ok(url)
    }
}

/// Used when no storage is configured; every media message fails at upload.
#[derive(Clone, Copy, Default)]
pub struct DisabledUploader;

#[async_trait]
impl AttachmentUploader for DisabledUploader {
    async fn upload(&self, _buffer: Bytes, name: &str, _mime_type: &str) -> Result<String> {
        bail!("no attachment storage configured for {name}")
    }
}
