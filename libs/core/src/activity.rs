use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::envelope::Referral;
use crate::message::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Text,
    Image,
    Audio,
    File,
    Video,
    Sticker,
    Interactive,
    Contact,
    Reaction,
}

impl From<MediaKind> for ActivityKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => ActivityKind::Image,
            MediaKind::Audio => ActivityKind::Audio,
            MediaKind::File => ActivityKind::File,
            MediaKind::Video => ActivityKind::Video,
            MediaKind::Sticker => ActivityKind::Sticker,
        }
    }
}

/// Durable reference to an uploaded attachment; this, not the bytes, is what
/// gets stored on an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size: usize,
    pub extension: Option<String>,
}

/// Downloaded media held for the duration of one dispatch call.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub buffer: Bytes,
    pub mime_type: String,
    pub size: usize,
    pub suggested_name: String,
    pub extension: Option<String>,
}

/// Inbound activity handed to the activity store (or attached to a new
/// conversation as its start activity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub hash: String,
    pub kind: ActivityKind,
    pub from: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub quoted_hash: Option<String>,
    #[serde(default)]
    pub referral: Option<Referral>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default)]
    pub postback: Option<String>,
    /// Provider timestamp in milliseconds.
    pub timestamp: i64,
}

impl ActivityRequest {
    pub fn new(
        hash: impl Into<String>,
        kind: ActivityKind,
        from: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            hash: hash.into(),
            kind,
            from: from.into(),
            sender_name: None,
            text: None,
            attachments: Vec::new(),
            quoted_hash: None,
            referral: None,
            reaction: None,
            postback: None,
            timestamp,
        }
    }
}
