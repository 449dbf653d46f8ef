use std::time::Duration;

use anyhow::Result;
use gup_core::{
    ActivityRequest, ChannelConfig, ConversationRef, ConversationSeed, NewConversation,
    Provisioned, SessionUpdate, SharedConversationStore, brazilian_variants,
};
use tracing::debug;

/// What the dispatcher should do with the sender's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing(ConversationRef),
    Provision(ConversationSeed),
    /// No conversation exists and the channel refuses inbound attendance.
    Blocked,
}

#[derive(Clone)]
pub struct ConversationResolver {
    conversations: SharedConversationStore,
    session_window: Duration,
}

impl ConversationResolver {
    pub fn new(conversations: SharedConversationStore, session_window: Duration) -> Self {
        Self {
            conversations,
            session_window,
        }
    }

    /// Active conversation by canonical id, then by the Brazilian 9/no-9
    /// variants of the id.
    pub async fn resolve(
        &self,
        channel: &ChannelConfig,
        member_id: &str,
    ) -> Result<Option<ConversationRef>> {
        if let Some(found) = self
            .conversations
            .find_active(&channel.token, member_id)
            .await?
        {
            return Ok(Some(found));
        }
        if !channel.phone_keyed {
            return Ok(None);
        }
        let Some(variants) = brazilian_variants(member_id) else {
            return Ok(None);
        };
        let found = self
            .conversations
            .find_by_members(&channel.token, &variants.to_vec())
            .await?;
        if let Some(conversation) = &found {
            debug!(
                channel = %channel.token,
                member = member_id,
                conversation = %conversation.id,
                "conversation matched through phone variant"
            );
        }
        Ok(found)
    }

    pub async fn plan(
        &self,
        channel: &ChannelConfig,
        member_id: &str,
        member_name: Option<&str>,
    ) -> Result<Resolution> {
        if let Some(existing) = self.resolve(channel, member_id).await? {
            return Ok(Resolution::Existing(existing));
        }
        if channel.block_inbound_attendance {
            return Ok(Resolution::Blocked);
        }
        Ok(Resolution::Provision(ConversationSeed {
            channel_token: channel.token.clone(),
            workspace_id: channel.workspace_id.clone(),
            member_id: member_id.to_string(),
            member_name: member_name.map(str::to_string),
        }))
    }

    /// Get-or-create. When `created` is false the caller still owns
    /// persisting `start_activity`.
    pub async fn provision(
        &self,
        seed: ConversationSeed,
        start_activity: ActivityRequest,
    ) -> Result<Provisioned> {
        self.conversations
            .get_or_create(NewConversation {
                seed,
                start_activity,
            })
            .await
    }

    /// Extends the session window from `timestamp_ms` and counts the inbound message.
    pub async fn touch_session(
        &self,
        conversation: &ConversationRef,
        timestamp_ms: i64,
    ) -> Result<()> {
        let window_ms = i64::try_from(self.session_window.as_millis()).unwrap_or(i64::MAX);
        self.conversations
            .update_session(
                &conversation.id,
                SessionUpdate {
                    last_inbound_ms: timestamp_ms,
                    expires_at_ms: timestamp_ms.saturating_add(window_ms),
                    inbound_increment: 1,
                },
            )
            .await
    }
}
