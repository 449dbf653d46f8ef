//! Remote media download and re-upload.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use gup_core::{AttachmentRef, PendingAttachment, SharedUploader};
use http::{HeaderMap, StatusCode, header};
use nanoid::nanoid;
use tracing::{error, warn};

use crate::error::MediaError;
use crate::throttle::MediaThrottle;

const BODY_LOG_LIMIT: usize = 512;
const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<FetchedMedia, MediaError>;
}

pub type SharedMediaSource = Arc<dyn MediaSource>;

#[derive(Clone, Default)]
pub struct HttpMediaSource {
    client: reqwest::Client,
}

impl HttpMediaSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> MediaError {
    if err.is_timeout() {
        MediaError::Timeout {
            url: url.to_string(),
        }
    } else {
        MediaError::Transport {
            url: url.to_string(),
            source: anyhow::Error::new(err),
        }
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<FetchedMedia, MediaError> {
        let response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| transport_error(url, err))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(url, err))?;
        Ok(FetchedMedia {
            status,
            headers,
            body,
        })
    }
}

/// Value of the `filename` parameter of a `content-disposition` header,
/// reduced to its last `=`-delimited segment with quotes stripped.
///
/// ```
/// use gup_pipeline::media::filename_from_disposition;
///
/// assert_eq!(
///     filename_from_disposition(r#"attachment; filename="a=b.pdf""#).as_deref(),
///     Some("b.pdf")
/// );
/// assert_eq!(
///     filename_from_disposition(r#"attachment; filename="x.pdf"; size=12"#).as_deref(),
///     Some("x.pdf")
/// );
/// assert_eq!(filename_from_disposition("inline"), None);
/// ```
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let start = value
        .to_ascii_lowercase()
        .match_indices("filename=")
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || matches!(value.as_bytes()[idx - 1], b';' | b' ' | b'\t'))?;
    let rest = value[start + "filename=".len()..].trim_start();
    let raw = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split(';').next().unwrap_or_default(),
    };
    let last = raw.rsplit('=').next().unwrap_or_default();
    let name = last.trim().trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Subtype of a `content-type`, without parameters or `+suffix`.
///
/// ```
/// use gup_pipeline::media::extension_from_content_type;
///
/// assert_eq!(extension_from_content_type("application/pdf").as_deref(), Some("pdf"));
/// assert_eq!(extension_from_content_type("image/svg+xml; q=1").as_deref(), Some("svg"));
/// assert_eq!(extension_from_content_type("garbage"), None);
/// ```
pub fn extension_from_content_type(value: &str) -> Option<String> {
    let essence = value.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let ext = subtype.split('+').next()?.trim().to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

fn truncated(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(BODY_LOG_LIMIT).collect()
}

#[derive(Clone)]
pub struct MediaIngestor {
    source: SharedMediaSource,
    uploader: SharedUploader,
    throttle: MediaThrottle,
    timeout: Duration,
}

impl MediaIngestor {
    pub fn new(
        source: SharedMediaSource,
        uploader: SharedUploader,
        throttle: MediaThrottle,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            uploader,
            throttle,
            timeout,
        }
    }

    /// Throttles, downloads and describes one remote attachment.
    pub async fn ingest(
        &self,
        sender_phone: &str,
        url: &str,
        headers: HeaderMap,
    ) -> Result<PendingAttachment, MediaError> {
        if let Err(err) = self.throttle.wait(sender_phone).await {
            warn!(phone = sender_phone, error = %err, "media throttle unavailable; fetching anyway");
        }

        let fetched = match self.source.fetch(url, headers, self.timeout).await {
            Ok(fetched) => fetched,
            Err(err) => {
                error!(url, error = %err, "media fetch failed");
                return Err(err);
            }
        };

        if fetched.status.as_u16() >= 300 {
            let body = truncated(&fetched.body);
            error!(
                url,
                status = %fetched.status,
                headers = ?fetched.headers,
                body = %body,
                "media fetch rejected"
            );
            return Err(MediaError::Status {
                url: url.to_string(),
                status: fetched.status,
                headers: fetched.headers,
                body,
            });
        }

        let disposition = fetched
            .headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok());
        let suggested_name = disposition
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| nanoid!());

        let content_type = fetched
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let extension = content_type.and_then(extension_from_content_type);
        if extension.is_none() {
            warn!(url, content_type = ?content_type, "media without usable content-type");
        }
        let mime_type = content_type
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        Ok(PendingAttachment {
            size: fetched.body.len(),
            buffer: fetched.body,
            mime_type,
            suggested_name,
            extension,
        })
    }

    /// Hands the buffer to the uploader and returns the durable reference.
    pub async fn store(&self, pending: PendingAttachment) -> Result<AttachmentRef, MediaError> {
        let url = self
            .uploader
            .upload(pending.buffer, &pending.suggested_name, &pending.mime_type)
            .await
            .map_err(MediaError::Upload)?;
        Ok(AttachmentRef {
            url,
            name: pending.suggested_name,
            mime_type: pending.mime_type,
            size: pending.size,
            extension: pending.extension,
        })
    }
}
