//! In-memory collaborators. Used by the ingress app when no external stores
//! are configured and as recording fakes in tests.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::ack::AckType;
use crate::activity::ActivityRequest;
use crate::conversation::{
    ChannelConfig, ConversationRef, NewConversation, Provisioned, SessionUpdate,
    TemplateStatusUpdate,
};
use crate::interfaces::{
    ActivityStore, AttachmentUploader, ChannelConfigStore, ConversationStore, TemplateStatusSink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct StoredActivity {
    pub activity: ActivityRequest,
    pub conversation: ConversationRef,
    pub start: bool,
    pub ack: Option<AckType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub hash: String,
    pub ack: AckType,
    pub timestamp: i64,
}

#[derive(Default)]
pub struct MemoryActivityStore {
    activities: DashMap<String, StoredActivity>,
    acks: Mutex<Vec<AckRecord>>,
    exists_calls: AtomicUsize,
    persist_calls: AtomicUsize,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an activity, e.g. an outbound message whose acks are expected.
    pub fn insert(&self, activity: ActivityRequest, conversation: ConversationRef) {
        self.store(activity, conversation, false);
    }

    fn store(&self, activity: ActivityRequest, conversation: ConversationRef, start: bool) {
        self.activities.insert(
            activity.hash.clone(),
            StoredActivity {
                activity,
                conversation,
                start,
                ack: None,
            },
        );
    }

    pub fn get(&self, hash: &str) -> Option<StoredActivity> {
        self.activities.get(hash).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn acks(&self) -> Vec<AckRecord> {
        lock(&self.acks).clone()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn exists_by_hash(&self, hash: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.activities.contains_key(hash))
    }

    async fn persist_activity(
        &self,
        activity: &ActivityRequest,
        conversation: &ConversationRef,
        use_hash_as_id: bool,
    ) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if use_hash_as_id && self.activities.contains_key(&activity.hash) {
            bail!("activity {} already exists", activity.hash);
        }
        self.store(activity.clone(), conversation.clone(), false);
        Ok(())
    }

    async fn conversation_by_hash(&self, hash: &str) -> Result<Option<ConversationRef>> {
        Ok(self
            .activities
            .get(hash)
            .map(|entry| entry.conversation.clone()))
    }

    async fn update_ack(&self, hash: &str, ack: AckType, timestamp: i64) -> Result<()> {
        if let Some(mut entry) = self.activities.get_mut(hash) {
            entry.ack = Some(ack);
        }
        lock(&self.acks).push(AckRecord {
            hash: hash.to_string(),
            ack,
            timestamp,
        });
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversationCalls {
    pub find_active: usize,
    pub find_by_members: usize,
    pub get_or_create: usize,
    pub update_session: usize,
    pub mark_invalid: usize,
}

#[derive(Debug, Clone)]
pub struct StoredConversation {
    pub conversation: ConversationRef,
    pub workspace_id: String,
    pub member_name: Option<String>,
    pub session: Option<SessionUpdate>,
    pub inbound_count: u64,
    pub invalid_destination: bool,
    pub invalid_phone: Option<String>,
}

pub struct MemoryConversationStore {
    activities: Arc<MemoryActivityStore>,
    conversations: DashMap<String, StoredConversation>,
    by_member: DashMap<(String, String), String>,
    calls: Mutex<ConversationCalls>,
    member_queries: Mutex<Vec<Vec<String>>>,
}

impl MemoryConversationStore {
    /// Start activities of created conversations are recorded in `activities`.
    pub fn new(activities: Arc<MemoryActivityStore>) -> Self {
        Self {
            activities,
            conversations: DashMap::new(),
            by_member: DashMap::new(),
            calls: Mutex::new(ConversationCalls::default()),
            member_queries: Mutex::new(Vec::new()),
        }
    }

    /// Seeds an existing conversation.
    pub fn insert(&self, conversation: ConversationRef, workspace_id: impl Into<String>) {
        for member in &conversation.members {
            self.by_member.insert(
                (conversation.channel_token.clone(), member.clone()),
                conversation.id.clone(),
            );
        }
        self.conversations.insert(
            conversation.id.clone(),
            StoredConversation {
                conversation,
                workspace_id: workspace_id.into(),
                member_name: None,
                session: None,
                inbound_count: 0,
                invalid_destination: false,
                invalid_phone: None,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<StoredConversation> {
        self.conversations.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn calls(&self) -> ConversationCalls {
        *lock(&self.calls)
    }

    /// Member id lists passed to `find_by_members`, in call order.
    pub fn member_queries(&self) -> Vec<Vec<String>> {
        lock(&self.member_queries).clone()
    }

    fn lookup(&self, channel_token: &str, member_id: &str) -> Option<ConversationRef> {
        let id = self
            .by_member
            .get(&(channel_token.to_string(), member_id.to_string()))
            .map(|entry| entry.value().clone())?;
        self.conversations
            .get(&id)
            .map(|entry| entry.conversation.clone())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_active(
        &self,
        channel_token: &str,
        member_id: &str,
    ) -> Result<Option<ConversationRef>> {
        lock(&self.calls).find_active += 1;
        Ok(self.lookup(channel_token, member_id))
    }

    async fn find_by_members(
        &self,
        channel_token: &str,
        member_ids: &[String],
    ) -> Result<Option<ConversationRef>> {
        lock(&self.calls).find_by_members += 1;
        lock(&self.member_queries).push(member_ids.to_vec());
        Ok(member_ids
            .iter()
            .find_map(|member| self.lookup(channel_token, member)))
    }

    async fn get_or_create(&self, request: NewConversation) -> Result<Provisioned> {
        lock(&self.calls).get_or_create += 1;
        let NewConversation {
            seed,
            start_activity,
        } = request;
        let key = (seed.channel_token.clone(), seed.member_id.clone());
        let conversation = match self.by_member.entry(key) {
            Entry::Occupied(existing) => {
                let id = existing.get().clone();
                drop(existing);
                if let Some(stored) = self.conversations.get(&id) {
                    return Ok(Provisioned {
                        conversation: stored.conversation.clone(),
                        created: false,
                    });
                }
                bail!("conversation index points at missing conversation {id}");
            }
            Entry::Vacant(slot) => {
                let conversation = ConversationRef {
                    id: Uuid::new_v4().to_string(),
                    channel_token: seed.channel_token.clone(),
                    members: vec![seed.member_id.clone()],
                };
                // Insert before releasing the index slot so concurrent
                // callers never see an id without its conversation.
                self.conversations.insert(
                    conversation.id.clone(),
                    StoredConversation {
                        conversation: conversation.clone(),
                        workspace_id: seed.workspace_id,
                        member_name: seed.member_name,
                        session: None,
                        inbound_count: 0,
                        invalid_destination: false,
                        invalid_phone: None,
                    },
                );
                slot.insert(conversation.id.clone());
                conversation
            }
        };
        self.activities
            .store(start_activity, conversation.clone(), true);
        Ok(Provisioned {
            conversation,
            created: true,
        })
    }

    async fn update_session(&self, conversation_id: &str, update: SessionUpdate) -> Result<()> {
        lock(&self.calls).update_session += 1;
        match self.conversations.get_mut(conversation_id) {
            Some(mut stored) => {
                stored.inbound_count += u64::from(update.inbound_increment);
                stored.session = Some(update);
                Ok(())
            }
            None => bail!("unknown conversation {conversation_id}"),
        }
    }

    async fn mark_invalid_destination(
        &self,
        conversation_id: &str,
        phone: Option<&str>,
    ) -> Result<()> {
        lock(&self.calls).mark_invalid += 1;
        if let Some(mut stored) = self.conversations.get_mut(conversation_id) {
            stored.invalid_destination = true;
            stored.invalid_phone = phone.map(str::to_string);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Default)]
pub struct MemoryUploader {
    uploads: Mutex<Vec<UploadRecord>>,
    fail: AtomicBool,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        lock(&self.uploads).clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AttachmentUploader for MemoryUploader {
    async fn upload(&self, buffer: Bytes, name: &str, mime_type: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("upload of {name} rejected");
        }
        lock(&self.uploads).push(UploadRecord {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: buffer.len(),
        });
        Ok(format!("memory://attachments/{name}"))
    }
}

#[derive(Default)]
pub struct MemoryChannelConfigStore {
    channels: DashMap<String, ChannelConfig>,
}

impl MemoryChannelConfigStore {
    pub fn new(channels: impl IntoIterator<Item = ChannelConfig>) -> Self {
        let store = Self::default();
        for channel in channels {
            store.insert(channel);
        }
        store
    }

    pub fn insert(&self, channel: ChannelConfig) {
        self.channels.insert(channel.token.clone(), channel);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelConfigStore for MemoryChannelConfigStore {
    async fn get(&self, channel_token: &str) -> Result<Option<ChannelConfig>> {
        Ok(self
            .channels
            .get(channel_token)
            .map(|entry| entry.value().clone()))
    }
}

#[derive(Default)]
pub struct MemoryTemplateSink {
    updates: Mutex<Vec<(String, TemplateStatusUpdate)>>,
}

impl MemoryTemplateSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, TemplateStatusUpdate)> {
        lock(&self.updates).clone()
    }
}

#[async_trait]
impl TemplateStatusSink for MemoryTemplateSink {
    async fn update_status(
        &self,
        channel_token: &str,
        update: TemplateStatusUpdate,
    ) -> Result<()> {
        lock(&self.updates).push((channel_token.to_string(), update));
        Ok(())
    }
}
