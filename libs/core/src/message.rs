//! Closed set of inbound message variants.

use serde_json::Value;

use crate::envelope::{EnvelopePayload, InnerPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
    File,
    Video,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::File => "file",
            MediaKind::Video => "video",
            MediaKind::Sticker => "sticker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractiveKind {
    ButtonReply,
    ListReply,
}

/// A classified `message` envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        url: String,
        caption: Option<String>,
        name: Option<String>,
    },
    /// Button or list reply; `text` is the normalized title, `postback` the
    /// payload the business attached to the option.
    Interactive {
        kind: InteractiveKind,
        text: String,
        postback: Option<String>,
    },
    QuickReply {
        text: String,
    },
    Contact {
        contacts: Vec<Value>,
    },
    Reaction {
        emoji: String,
        target: Option<String>,
    },
    /// Any provider message type this pipeline does not handle, or a known
    /// type missing its required field.
    Unhandled {
        kind: String,
    },
}

impl InboundMessage {
    /// Classifies `payload.type` into a variant.
    ///
    /// ```
    /// use gup_core::{EnvelopePayload, InboundMessage, InnerPayload};
    ///
    /// let payload = EnvelopePayload {
    ///     kind: Some("text".into()),
    ///     payload: Some(InnerPayload { text: Some("hello".into()), ..Default::default() }),
    ///     ..Default::default()
    /// };
    /// assert_eq!(InboundMessage::classify(&payload), InboundMessage::Text { text: "hello".into() });
    /// ```
    pub fn classify(payload: &EnvelopePayload) -> Self {
        let kind = payload.kind.as_deref().unwrap_or_default();
        let empty = InnerPayload::default();
        let inner = payload.payload.as_ref().unwrap_or(&empty);
        let unhandled = || InboundMessage::Unhandled {
            kind: kind.to_string(),
        };

        match kind {
            "text" => match non_empty(&inner.text) {
                Some(text) => InboundMessage::Text { text },
                None => unhandled(),
            },
            "image" | "audio" | "file" | "video" | "sticker" => {
                let media = match kind {
                    "image" => MediaKind::Image,
                    "audio" => MediaKind::Audio,
                    "file" => MediaKind::File,
                    "video" => MediaKind::Video,
                    _ => MediaKind::Sticker,
                };
                match non_empty(&inner.url) {
                    Some(url) => InboundMessage::Media {
                        kind: media,
                        url,
                        caption: non_empty(&inner.caption),
                        name: non_empty(&inner.name),
                    },
                    None => unhandled(),
                }
            }
            "button_reply" | "list_reply" => {
                let interactive = if kind == "button_reply" {
                    InteractiveKind::ButtonReply
                } else {
                    InteractiveKind::ListReply
                };
                let text = non_empty(&inner.title)
                    .or_else(|| non_empty(&inner.reply))
                    .or_else(|| non_empty(&inner.text));
                match text {
                    Some(text) => InboundMessage::Interactive {
                        kind: interactive,
                        text,
                        postback: non_empty(&inner.postback_text)
                            .or_else(|| non_empty(&inner.reply))
                            .or_else(|| non_empty(&inner.id)),
                    },
                    None => unhandled(),
                }
            }
            "quick_reply" => match non_empty(&inner.text) {
                Some(text) => InboundMessage::QuickReply { text },
                None => unhandled(),
            },
            "contact" => match inner.contacts.as_ref() {
                Some(contacts) if !contacts.is_empty() => InboundMessage::Contact {
                    contacts: contacts.clone(),
                },
                _ => unhandled(),
            },
            "reaction" => InboundMessage::Reaction {
                emoji: inner.emoji.clone().unwrap_or_default(),
                target: non_empty(&inner.msg_id)
                    .or_else(|| non_empty(&inner.id))
                    .or_else(|| {
                        payload
                            .context
                            .as_ref()
                            .and_then(|ctx| non_empty(&ctx.gs_id).or_else(|| non_empty(&ctx.id)))
                    }),
            },
            _ => unhandled(),
        }
    }

    pub fn kind_str(&self) -> &str {
        match self {
            InboundMessage::Text { .. } => "text",
            InboundMessage::Media { kind, .. } => kind.as_str(),
            InboundMessage::Interactive {
                kind: InteractiveKind::ButtonReply,
                ..
            } => "button_reply",
            InboundMessage::Interactive {
                kind: InteractiveKind::ListReply,
                ..
            } => "list_reply",
            InboundMessage::QuickReply { .. } => "quick_reply",
            InboundMessage::Contact { .. } => "contact",
            InboundMessage::Reaction { .. } => "reaction",
            InboundMessage::Unhandled { kind } => kind.as_str(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
