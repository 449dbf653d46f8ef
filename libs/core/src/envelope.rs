//! Raw Gupshup webhook envelope.
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! provider payload is ignored on decode.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level envelope `type`.
///
/// ```
/// use gup_core::EnvelopeType;
///
/// assert_eq!(EnvelopeType::from("message-event".to_string()), EnvelopeType::MessageEvent);
/// assert_eq!(EnvelopeType::from("new-kind".to_string()).as_str(), "new-kind");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeType {
    Message,
    MessageEvent,
    UserEvent,
    TemplateEvent,
    BillingEvent,
    Unknown(String),
}

impl EnvelopeType {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeType::Message => "message",
            EnvelopeType::MessageEvent => "message-event",
            EnvelopeType::UserEvent => "user-event",
            EnvelopeType::TemplateEvent => "template-event",
            EnvelopeType::BillingEvent => "billing-event",
            EnvelopeType::Unknown(other) => other.as_str(),
        }
    }
}

impl From<String> for EnvelopeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => EnvelopeType::Message,
            "message-event" => EnvelopeType::MessageEvent,
            "user-event" => EnvelopeType::UserEvent,
            "template-event" => EnvelopeType::TemplateEvent,
            "billing-event" => EnvelopeType::BillingEvent,
            _ => EnvelopeType::Unknown(value),
        }
    }
}

impl From<EnvelopeType> for String {
    fn from(value: EnvelopeType) -> Self {
        value.as_str().to_string()
    }
}

/// One inbound webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default)]
    pub app: Option<String>,
    /// Provider timestamp in milliseconds.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: EnvelopePayload,
}

impl InboundEnvelope {
    /// The message hash used by the dedup gate.
    pub fn message_hash(&self) -> Option<&str> {
        let id = self.payload.id.trim();
        (!id.is_empty()).then_some(id)
    }

    pub fn inner(&self) -> Option<&InnerPayload> {
        self.payload.payload.as_ref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopePayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub gs_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub payload: Option<InnerPayload>,
    #[serde(default)]
    pub context: Option<QuotedContext>,
    #[serde(default)]
    pub referral: Option<Referral>,
    /// Either a plain category string or an `{old, new}` object.
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub element_name: Option<String>,
    #[serde(default)]
    pub rejected_reason: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sender {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub dial_code: Option<String>,
}

/// Type-dependent inner payload. Message variants and delivery events share
/// this struct; each reader picks the fields it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerPayload {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub contacts: Option<Vec<Value>>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub gs_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "wa_id")]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub postback_text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub code: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub ts: Option<i64>,
}

/// Reference to the message being replied to or reacted on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotedContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub gs_id: Option<String>,
}

/// Click-to-WhatsApp ad metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Referral {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub image: Option<Value>,
    #[serde(default)]
    pub video: Option<Value>,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_i64(deserializer)?.unwrap_or_default())
}

// Gupshup sends some numeric fields as strings depending on API version.
fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
