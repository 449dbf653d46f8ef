//! Inbound Gupshup pipeline: dedup, conversation resolution, media
//! ingestion, quoted-message resolution and delivery-ack reconciliation.
//!
//! [`Dispatcher`] is the entry point; every collaborator it needs is passed
//! in through [`Collaborators`].

pub mod ack;
pub mod config;
pub mod contact;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod report;
pub mod throttle;

pub use ack::{AckOutcome, AckReconciler, missing_received_key, process_error};
pub use config::PipelineConfig;
pub use conversation::{ConversationResolver, Resolution};
pub use dispatch::{Collaborators, DispatchOutcome, Dispatcher};
pub use error::{DispatchError, DispatchResult, MediaError};
pub use media::{FetchedMedia, HttpMediaSource, MediaIngestor, MediaSource, SharedMediaSource};
pub use report::{
    AlertSink, BusErrorSink, ErrorDetail, ErrorRecord, ErrorSink, LogAlertSink, LogErrorSink,
    SharedAlertSink, SharedErrorSink,
};
pub use throttle::MediaThrottle;
