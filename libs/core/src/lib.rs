//! Gupshup pipeline core contracts and value types.
//!
//! This crate exposes the webhook envelope model, the acknowledgment types and
//! error-code table, and the collaborator interfaces (conversation store,
//! activity store, uploader, cache) that the pipeline and ingress crates are
//! wired against. In-memory implementations of every collaborator live in
//! [`memory`] for local runs and tests.
pub mod ack;
pub mod activity;
pub mod cache;
pub mod conversation;
pub mod envelope;
pub mod interfaces;
pub mod memory;
pub mod message;
pub mod phone;
#[cfg(feature = "redis-cache")]
mod redis_cache;
pub mod subjects;

pub use ack::*;
pub use activity::*;
pub use cache::*;
pub use conversation::*;
pub use envelope::*;
pub use interfaces::*;
pub use message::*;
pub use phone::*;
#[cfg(feature = "redis-cache")]
pub use redis_cache::RedisCache;
pub use subjects::*;
