//! Collaborator contracts the pipeline is wired against. Implementations are
//! passed in at construction; nothing is looked up at runtime.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::ack::AckType;
use crate::activity::ActivityRequest;
use crate::conversation::{
    ChannelConfig, ConversationRef, NewConversation, Provisioned, SessionUpdate,
    TemplateStatusUpdate,
};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fast path: a recently active conversation for exactly this member id.
    async fn find_active(
        &self,
        channel_token: &str,
        member_id: &str,
    ) -> Result<Option<ConversationRef>>;

    /// List lookup: the first conversation whose member matches any of `member_ids`.
    async fn find_by_members(
        &self,
        channel_token: &str,
        member_ids: &[String],
    ) -> Result<Option<ConversationRef>>;

    /// Creates the conversation with its start activity, or returns the
    /// existing one untouched.
    async fn get_or_create(&self, request: NewConversation) -> Result<Provisioned>;

    async fn update_session(&self, conversation_id: &str, update: SessionUpdate) -> Result<()>;

    async fn mark_invalid_destination(
        &self,
        conversation_id: &str,
        phone: Option<&str>,
    ) -> Result<()>;
}

/// Sink for inbound activities and their acknowledgment state.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn exists_by_hash(&self, hash: &str) -> Result<bool>;

    async fn persist_activity(
        &self,
        activity: &ActivityRequest,
        conversation: &ConversationRef,
        use_hash_as_id: bool,
    ) -> Result<()>;

    async fn conversation_by_hash(&self, hash: &str) -> Result<Option<ConversationRef>>;

    async fn update_ack(&self, hash: &str, ack: AckType, timestamp: i64) -> Result<()>;
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Stores the bytes durably and returns the reference (URL or key).
    async fn upload(&self, buffer: Bytes, name: &str, mime_type: &str) -> Result<String>;
}

#[async_trait]
pub trait ChannelConfigStore: Send + Sync {
    async fn get(&self, channel_token: &str) -> Result<Option<ChannelConfig>>;
}

#[async_trait]
pub trait TemplateStatusSink: Send + Sync {
    async fn update_status(&self, channel_token: &str, update: TemplateStatusUpdate)
    -> Result<()>;
}

pub type SharedConversationStore = Arc<dyn ConversationStore>;
pub type SharedActivityStore = Arc<dyn ActivityStore>;
pub type SharedUploader = Arc<dyn AttachmentUploader>;
pub type SharedChannelConfigStore = Arc<dyn ChannelConfigStore>;
pub type SharedTemplateStatusSink = Arc<dyn TemplateStatusSink>;
