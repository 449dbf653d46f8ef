//! Delivery acknowledgment types, the provider error-code table and the
//! outbound ack-update event.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationRef;
use crate::envelope::{EnvelopeType, InboundEnvelope};

pub const WHATSWEB_MESSAGE_ACK: &str = "WHATSWEB_MESSAGE_ACK";

/// Provider delivery status carried by a `message-event`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AckStatus {
    Enqueued,
    Sent,
    Delivered,
    Read,
    Failed,
    Other(String),
}

impl AckStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "enqueued" => AckStatus::Enqueued,
            "sent" => AckStatus::Sent,
            "delivered" => AckStatus::Delivered,
            "read" => AckStatus::Read,
            "failed" => AckStatus::Failed,
            other => AckStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AckStatus::Enqueued => "enqueued",
            AckStatus::Sent => "sent",
            AckStatus::Delivered => "delivered",
            AckStatus::Read => "read",
            AckStatus::Failed => "failed",
            AckStatus::Other(other) => other.as_str(),
        }
    }
}

/// Acknowledgment state written onto an activity. Serialized as its integer
/// value; error states are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum AckType {
    ServerAck,
    DeliveryAck,
    Read,
    Error500,
    NumberDontExists,
    UserExperiment,
    UserDontExists,
    NoTemplateMatch,
    MessageTooLong,
    MessageUndeliverable,
    LimitTemplateMarketingExceeded,
    PhoneNotRegisteredOnWhatsappBusiness,
    /// Provider error code missing from the table; value is `-code`.
    Unmapped(i64),
}

impl AckType {
    /// Maps a provider error code through the fixed table.
    ///
    /// ```
    /// use gup_core::AckType;
    ///
    /// assert_eq!(AckType::from_error_code(503), AckType::Error500);
    /// assert_eq!(AckType::from_error_code(130472), AckType::UserExperiment);
    /// assert_eq!(AckType::from_error_code(777).value(), -777);
    /// ```
    pub fn from_error_code(code: i64) -> Self {
        match code {
            500 | 503 => AckType::Error500,
            1002 => AckType::NumberDontExists,
            472 | 130472 => AckType::UserExperiment,
            1013 => AckType::UserDontExists,
            4003 => AckType::NoTemplateMatch,
            1001 => AckType::MessageTooLong,
            131026 => AckType::MessageUndeliverable,
            131049 => AckType::LimitTemplateMarketingExceeded,
            133010 => AckType::PhoneNotRegisteredOnWhatsappBusiness,
            other => AckType::Unmapped(other),
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            AckType::ServerAck => 1,
            AckType::DeliveryAck => 2,
            AckType::Read => 3,
            AckType::Error500 => -500,
            AckType::NumberDontExists => -1002,
            AckType::UserExperiment => -472,
            AckType::UserDontExists => -1013,
            AckType::NoTemplateMatch => -4003,
            AckType::MessageTooLong => -1001,
            AckType::MessageUndeliverable => -131026,
            AckType::LimitTemplateMarketingExceeded => -131049,
            AckType::PhoneNotRegisteredOnWhatsappBusiness => -133010,
            AckType::Unmapped(code) => code.saturating_neg(),
        }
    }

    /// Error states that mean the destination number cannot receive messages.
    pub fn is_invalid_number(&self) -> bool {
        matches!(
            self,
            AckType::NumberDontExists | AckType::UserDontExists | AckType::MessageUndeliverable
        )
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, AckType::Unmapped(_))
    }

    pub fn is_error(&self) -> bool {
        self.value() < 0
    }

    pub fn name(&self) -> &'static str {
        match self {
            AckType::ServerAck => "server_ack",
            AckType::DeliveryAck => "delivery_ack",
            AckType::Read => "read",
            AckType::Error500 => "error_500",
            AckType::NumberDontExists => "number_dont_exists",
            AckType::UserExperiment => "user_experiment",
            AckType::UserDontExists => "user_dont_exists",
            AckType::NoTemplateMatch => "no_template_match",
            AckType::MessageTooLong => "message_too_long",
            AckType::MessageUndeliverable => "message_undeliverable",
            AckType::LimitTemplateMarketingExceeded => "limit_template_marketing_exceeded",
            AckType::PhoneNotRegisteredOnWhatsappBusiness => {
                "phone_not_registered_on_whatsapp_business"
            }
            AckType::Unmapped(_) => "unmapped",
        }
    }
}

impl From<AckType> for i64 {
    fn from(value: AckType) -> Self {
        value.value()
    }
}

impl From<i64> for AckType {
    fn from(value: i64) -> Self {
        match value {
            1 => AckType::ServerAck,
            2 => AckType::DeliveryAck,
            3 => AckType::Read,
            v if v < 0 => AckType::from_error_code(v.saturating_neg()),
            v => AckType::Unmapped(-v),
        }
    }
}

/// One provider delivery event, consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub provider_message_id: String,
    pub status: AckStatus,
    pub error_code: Option<i64>,
    pub reason: Option<String>,
    pub timestamp: i64,
    pub destination: Option<String>,
}

impl AckEvent {
    /// Extracts the ack event from a `message-event` envelope. The Gupshup id
    /// (`gsId`) is preferred because it is what the outbound send call returns.
    pub fn from_envelope(env: &InboundEnvelope) -> Option<Self> {
        if env.kind != EnvelopeType::MessageEvent {
            return None;
        }
        let payload = &env.payload;
        let inner = payload.payload.as_ref();
        let provider_message_id = payload
            .gs_id
            .clone()
            .or_else(|| inner.and_then(|p| p.gs_id.clone()))
            .filter(|id| !id.trim().is_empty())
            .or_else(|| (!payload.id.trim().is_empty()).then(|| payload.id.clone()))?;
        let status = AckStatus::parse(payload.kind.as_deref().unwrap_or_default());
        Some(Self {
            provider_message_id,
            status,
            error_code: inner.and_then(|p| p.code),
            reason: inner.and_then(|p| p.reason.clone()),
            timestamp: env.timestamp,
            destination: payload.destination.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckUpdateData {
    pub ack: AckType,
    pub hash: Vec<String>,
    pub timestamp: i64,
    pub workspace_id: Option<String>,
    pub conversation: Option<ConversationRef>,
}

/// Event published downstream for every reconciled ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckUpdate {
    pub data: AckUpdateData,
    pub data_type: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AckUpdate {
    pub fn new(
        ack: AckType,
        hash: impl Into<String>,
        timestamp: i64,
        workspace_id: Option<String>,
        conversation: Option<ConversationRef>,
    ) -> Self {
        Self {
            data: AckUpdateData {
                ack,
                hash: vec![hash.into()],
                timestamp,
                workspace_id,
                conversation,
            },
            data_type: WHATSWEB_MESSAGE_ACK.to_string(),
            kind: WHATSWEB_MESSAGE_ACK.to_string(),
        }
    }
}
