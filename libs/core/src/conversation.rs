use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::activity::ActivityRequest;

/// Minimal conversation identity; the conversation store owns the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub id: String,
    pub channel_token: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Per-channel settings, keyed by the channel token in the webhook path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub token: String,
    pub workspace_id: String,
    #[serde(default)]
    pub app: Option<String>,
    /// Sent as the `apikey` header on media downloads.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Receptive-only channels: inbound messages never open a conversation.
    #[serde(default)]
    pub block_inbound_attendance: bool,
    #[serde(default = "default_phone_keyed")]
    pub phone_keyed: bool,
}

fn default_phone_keyed() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(token: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            workspace_id: workspace_id.into(),
            app: None,
            api_key: None,
            block_inbound_attendance: false,
            phone_keyed: true,
        }
    }

    /// Headers used for the authenticated media fetch.
    pub fn media_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = self.api_key.as_deref() {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static("apikey"), value);
                }
                Err(_) => warn!(channel = %self.token, "api key is not a valid header value"),
            }
        }
        headers
    }
}

/// What the resolver knows about a conversation it may have to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSeed {
    pub channel_token: String,
    pub workspace_id: String,
    pub member_id: String,
    pub member_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub seed: ConversationSeed,
    pub start_activity: ActivityRequest,
}

/// Result of get-or-create. `created == false` means another writer got there
/// first and the start activity was not attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub conversation: ConversationRef,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    pub last_inbound_ms: i64,
    pub expires_at_ms: i64,
    pub inbound_increment: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatusUpdate {
    pub template_id: String,
    pub element_name: Option<String>,
    pub status: String,
    pub rejected_reason: Option<String>,
    pub category: Option<Value>,
}
