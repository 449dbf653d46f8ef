//! Webhook entry point: classifies an envelope and routes it.

use std::sync::Arc;

use bytes::Bytes;
use gup_core::{
    AckEvent, ActivityKind, ActivityRequest, ChannelConfig, ConversationRef, EnvelopeType,
    InboundEnvelope, InboundMessage, SharedActivityStore, SharedCache, SharedChannelConfigStore,
    SharedConversationStore, SharedTemplateStatusSink, SharedUploader, TemplateStatusUpdate,
};
use gup_idhash::{IdHashRecord, IdHashStore};
use gup_outbox::Outbox;
use gup_telemetry::{MessageContext, TelemetryLabels, record_counter};
use tracing::{Instrument, debug, info, warn};

use crate::ack::{AckOutcome, AckReconciler};
use crate::config::PipelineConfig;
use crate::contact::{VCARD_MIME, display_name, render_vcard};
use crate::conversation::{ConversationResolver, Resolution};
use crate::error::{DispatchError, DispatchResult};
use crate::media::{MediaIngestor, SharedMediaSource};
use crate::report::{ErrorRecord, SharedAlertSink, SharedErrorSink};
use crate::throttle::MediaThrottle;

/// Everything the dispatcher talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub conversations: SharedConversationStore,
    pub activities: SharedActivityStore,
    pub uploader: SharedUploader,
    pub channels: SharedChannelConfigStore,
    pub templates: SharedTemplateStatusSink,
    pub cache: SharedCache,
    pub media: SharedMediaSource,
    pub idhash: Arc<IdHashStore>,
    pub outbox: Outbox,
    pub errors: SharedErrorSink,
    pub alerts: SharedAlertSink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Persisted {
        hash: String,
        conversation_id: String,
        created: bool,
    },
    Duplicate,
    UnknownChannel,
    Blocked,
    Unhandled {
        kind: String,
    },
    Ack(AckOutcome),
    TemplateStatus,
    Ignored,
}

struct Sender<'a> {
    id: &'a str,
    name: Option<&'a str>,
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: ConversationResolver,
    media: MediaIngestor,
    reconciler: AckReconciler,
    activities: SharedActivityStore,
    channels: SharedChannelConfigStore,
    templates: SharedTemplateStatusSink,
    uploader: SharedUploader,
    idhash: Arc<IdHashStore>,
    errors: SharedErrorSink,
}

impl Dispatcher {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        let Collaborators {
            conversations,
            activities,
            uploader,
            channels,
            templates,
            cache,
            media,
            idhash,
            outbox,
            errors,
            alerts,
        } = collaborators;
        let throttle = MediaThrottle::new(
            cache.clone(),
            config.throttle_step,
            config.throttle_window,
        );
        Self {
            resolver: ConversationResolver::new(conversations.clone(), config.session_window),
            media: MediaIngestor::new(media, uploader.clone(), throttle, config.media_timeout),
            reconciler: AckReconciler::new(
                idhash.clone(),
                activities.clone(),
                conversations,
                cache,
                outbox,
                alerts,
            ),
            activities,
            channels,
            templates,
            uploader,
            idhash,
            errors,
        }
    }

    pub fn reconciler(&self) -> &AckReconciler {
        &self.reconciler
    }

    pub fn idhash(&self) -> &IdHashStore {
        &self.idhash
    }

    /// Routes one envelope. Failures are reported to the error sink and
    /// returned so the webhook can answer 5xx and be retried.
    pub async fn dispatch(
        &self,
        channel_token: &str,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<DispatchOutcome> {
        let labels = TelemetryLabels::new(channel_token)
            .with_msg_id(envelope.payload.id.as_str())
            .with("type", envelope.kind.as_str());
        let span = MessageContext::new(labels.clone()).dispatch_span();
        let result = self
            .route(channel_token, envelope)
            .instrument(span)
            .await;
        match &result {
            Ok(outcome) => debug!(channel = channel_token, ?outcome, "envelope dispatched"),
            Err(err) => {
                record_counter("dispatch_failed", 1, &labels.with("stage", err.stage()));
                self.errors
                    .report(ErrorRecord::new(channel_token, err, envelope))
                    .await;
            }
        }
        result
    }

    async fn route(
        &self,
        channel_token: &str,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<DispatchOutcome> {
        match &envelope.kind {
            EnvelopeType::Message => self.on_message(channel_token, envelope).await,
            EnvelopeType::MessageEvent => self.on_message_event(channel_token, envelope).await,
            EnvelopeType::UserEvent => {
                info!(
                    channel = channel_token,
                    event = ?envelope.payload.kind,
                    phone = ?envelope.payload.phone,
                    "user event"
                );
                Ok(DispatchOutcome::Ignored)
            }
            EnvelopeType::TemplateEvent => self.on_template_event(channel_token, envelope).await,
            EnvelopeType::BillingEvent => Ok(DispatchOutcome::Ignored),
            EnvelopeType::Unknown(kind) => {
                warn!(channel = channel_token, kind = %kind, "unknown envelope type ignored");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    async fn channel(&self, channel_token: &str) -> DispatchResult<Option<ChannelConfig>> {
        let channel = self.channels.get(channel_token).await?;
        if channel.is_none() {
            debug!(channel = channel_token, "unknown channel token; dropping");
        }
        Ok(channel)
    }

    async fn on_message_event(
        &self,
        channel_token: &str,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<DispatchOutcome> {
        let Some(channel) = self.channel(channel_token).await? else {
            return Ok(DispatchOutcome::UnknownChannel);
        };
        let Some(event) = AckEvent::from_envelope(envelope) else {
            warn!(channel = channel_token, "message event without message id");
            return Ok(DispatchOutcome::Ignored);
        };
        let outcome = self
            .reconciler
            .reconcile(channel_token, Some(&channel.workspace_id), &event)
            .await?;
        Ok(DispatchOutcome::Ack(outcome))
    }

    async fn on_template_event(
        &self,
        channel_token: &str,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<DispatchOutcome> {
        if self.channel(channel_token).await?.is_none() {
            return Ok(DispatchOutcome::UnknownChannel);
        }
        let payload = &envelope.payload;
        let Some(status) = payload.status.clone().or_else(|| payload.kind.clone()) else {
            warn!(channel = channel_token, template = %payload.id, "template event without status");
            return Ok(DispatchOutcome::Ignored);
        };
        self.templates
            .update_status(
                channel_token,
                TemplateStatusUpdate {
                    template_id: payload.id.clone(),
                    element_name: payload.element_name.clone(),
                    status,
                    rejected_reason: payload.rejected_reason.clone(),
                    category: payload.category.clone(),
                },
            )
            .await?;
        Ok(DispatchOutcome::TemplateStatus)
    }

    async fn on_message(
        &self,
        channel_token: &str,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<DispatchOutcome> {
        let Some(hash) = envelope.message_hash() else {
            warn!(channel = channel_token, "message without id ignored");
            return Ok(DispatchOutcome::Ignored);
        };
        if self.activities.exists_by_hash(hash).await? {
            debug!(channel = channel_token, hash, "duplicate message dropped");
            record_counter(
                "dedup_hit",
                1,
                &TelemetryLabels::new(channel_token).with_msg_id(hash),
            );
            return Ok(DispatchOutcome::Duplicate);
        }

        let Some(channel) = self.channel(channel_token).await? else {
            return Ok(DispatchOutcome::UnknownChannel);
        };

        let message = InboundMessage::classify(&envelope.payload);
        if let InboundMessage::Unhandled { kind } = &message {
            warn!(channel = channel_token, hash, kind = %kind, "unhandled message type");
            return Ok(DispatchOutcome::Unhandled { kind: kind.clone() });
        }

        let payload = &envelope.payload;
        let sender_id = payload
            .sender
            .as_ref()
            .map(|s| s.phone.as_str())
            .or(payload.source.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let Some(sender_id) = sender_id else {
            warn!(channel = channel_token, hash, "message without sender ignored");
            return Ok(DispatchOutcome::Ignored);
        };
        let sender = Sender {
            id: sender_id,
            name: payload.sender.as_ref().and_then(|s| s.name.as_deref()),
        };

        let plan = self
            .resolver
            .plan(&channel, sender.id, sender.name)
            .await?;
        if plan == Resolution::Blocked {
            info!(channel = channel_token, hash, "inbound attendance blocked; dropping");
            return Ok(DispatchOutcome::Blocked);
        }

        let activity = self
            .build_activity(&channel, hash, &sender, &message, envelope)
            .await?;

        let (conversation, created) = match plan {
            Resolution::Existing(conversation) => {
                self.activities
                    .persist_activity(&activity, &conversation, true)
                    .await?;
                (conversation, false)
            }
            Resolution::Provision(seed) => {
                let provisioned = self.resolver.provision(seed, activity.clone()).await?;
                if !provisioned.created {
                    debug!(channel = channel_token, hash, "conversation created concurrently");
                    self.activities
                        .persist_activity(&activity, &provisioned.conversation, true)
                        .await?;
                }
                (provisioned.conversation, provisioned.created)
            }
            Resolution::Blocked => return Ok(DispatchOutcome::Blocked),
        };

        self.resolver
            .touch_session(&conversation, envelope.timestamp)
            .await?;
        self.remember(&channel, envelope, hash, &conversation).await?;

        info!(
            channel = channel_token,
            hash,
            conversation = %conversation.id,
            kind = message.kind_str(),
            created,
            "inbound message stored"
        );
        Ok(DispatchOutcome::Persisted {
            hash: hash.to_string(),
            conversation_id: conversation.id,
            created,
        })
    }

    /// Records provider id -> hash so later replies quoting this message resolve.
    async fn remember(
        &self,
        channel: &ChannelConfig,
        envelope: &InboundEnvelope,
        hash: &str,
        conversation: &ConversationRef,
    ) -> DispatchResult<()> {
        let mut ids = vec![hash.to_string()];
        if let Some(gs_id) = envelope
            .payload
            .gs_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != hash)
        {
            ids.push(gs_id.to_string());
        }
        for id in ids {
            let record = IdHashRecord::new(id, hash)
                .with_conversation(conversation.id.as_str())
                .with_workspace(channel.workspace_id.as_str());
            self.idhash.set_durable(&record).await?;
        }
        Ok(())
    }

    async fn quoted_hash(&self, envelope: &InboundEnvelope) -> DispatchResult<Option<String>> {
        let Some(context) = envelope.payload.context.as_ref() else {
            return Ok(None);
        };
        for id in [context.gs_id.as_deref(), context.id.as_deref()]
            .into_iter()
            .flatten()
            .filter(|id| !id.is_empty())
        {
            if let Some(hash) = self.idhash.resolve_quoted(id).await? {
                return Ok(Some(hash));
            }
        }
        debug!(msg_id = %envelope.payload.id, "quoted message not resolved");
        Ok(None)
    }

    async fn build_activity(
        &self,
        channel: &ChannelConfig,
        hash: &str,
        sender: &Sender<'_>,
        message: &InboundMessage,
        envelope: &InboundEnvelope,
    ) -> DispatchResult<ActivityRequest> {
        let mut activity =
            ActivityRequest::new(hash, ActivityKind::Text, sender.id, envelope.timestamp);
        activity.sender_name = sender.name.map(str::to_string);
        activity.referral = envelope.payload.referral.clone();
        activity.quoted_hash = self.quoted_hash(envelope).await?;

        match message {
            InboundMessage::Text { text } => {
                activity.text = Some(text.clone());
            }
            InboundMessage::Media {
                kind,
                url,
                caption,
                ..
            } => {
                activity.kind = (*kind).into();
                activity.text = caption.clone();
                let pending = self
                    .media
                    .ingest(sender.id, url, channel.media_headers())
                    .await?;
                activity.attachments.push(self.media.store(pending).await?);
            }
            InboundMessage::Interactive { text, postback, .. } => {
                activity.kind = ActivityKind::Interactive;
                activity.text = Some(text.clone());
                activity.postback = postback.clone();
            }
            InboundMessage::QuickReply { text } => {
                activity.kind = ActivityKind::Interactive;
                activity.text = Some(text.clone());
            }
            InboundMessage::Contact { contacts } => {
                activity.kind = ActivityKind::Contact;
                activity.attachments.push(self.contact_card(hash, contacts).await?);
                let names: Vec<String> = contacts.iter().filter_map(display_name).collect();
                if !names.is_empty() {
                    activity.text = Some(names.join(", "));
                }
            }
            InboundMessage::Reaction { emoji, target } => {
                activity.kind = ActivityKind::Reaction;
                activity.reaction = Some(emoji.clone());
                if let Some(target) = target.as_deref()
                    && !quotes_context(envelope, target)
                    && let Some(hash) = self.idhash.resolve_quoted(target).await?
                {
                    activity.quoted_hash = Some(hash);
                }
            }
            InboundMessage::Unhandled { .. } => {}
        }
        Ok(activity)
    }

    async fn contact_card(
        &self,
        hash: &str,
        contacts: &[serde_json::Value],
    ) -> DispatchResult<gup_core::AttachmentRef> {
        let card = render_vcard(contacts);
        let name = format!("{hash}.vcf");
        let size = card.len();
        let url = self
            .uploader
            .upload(Bytes::from(card), &name, VCARD_MIME)
            .await
            .map_err(DispatchError::Upload)?;
        Ok(gup_core::AttachmentRef {
            url,
            name,
            mime_type: VCARD_MIME.to_string(),
            size,
            extension: Some("vcf".into()),
        })
    }
}

/// True when `target` is one of the ids already tried through `context`.
fn quotes_context(envelope: &InboundEnvelope, target: &str) -> bool {
    envelope
        .payload
        .context
        .as_ref()
        .is_some_and(|c| c.id.as_deref() == Some(target) || c.gs_id.as_deref() == Some(target))
}
