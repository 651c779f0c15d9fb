//! Durable job queue transport.
//!
//! The transport guarantees at-least-once delivery: a received-but-undeleted
//! message becomes visible again after its visibility timeout elapses, which
//! is how retries happen without any explicit scheduling. Terminally failed
//! jobs are routed to a secondary poison channel for manual inspection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryQueue;

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown delivery handle: {0}")]
    UnknownHandle(String),

    #[error("Stale receipt for message {message_id}: the lease has expired and the message was re-delivered")]
    StaleReceipt { message_id: String },

    #[error("Queue transport failure: {0}")]
    Transport(String),
}

/// The payload enqueued for each analysis job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub record_id: String,
    pub owner_id: String,
}

/// A job routed to the poison channel after a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoisonMessage {
    pub record_id: Option<String>,
    pub owner_id: Option<String>,
    pub error_reason: String,
    pub failed_at: DateTime<Utc>,
    /// The original payload, carried when it could not be deserialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
}

impl PoisonMessage {
    /// Poison entry for a message that deserialized correctly.
    pub fn from_message(message: &JobMessage, reason: impl Into<String>) -> Self {
        Self {
            record_id: Some(message.record_id.clone()),
            owner_id: Some(message.owner_id.clone()),
            error_reason: reason.into(),
            failed_at: Utc::now(),
            raw_payload: None,
        }
    }

    /// Poison entry for a payload that could not be deserialized. The
    /// original payload is preserved verbatim for inspection.
    pub fn from_raw(payload: &str, reason: impl Into<String>) -> Self {
        Self {
            record_id: None,
            owner_id: None,
            error_reason: reason.into(),
            failed_at: Utc::now(),
            raw_payload: Some(payload.to_string()),
        }
    }
}

/// Opaque handle identifying one delivery of one message. The receipt is
/// reissued on every delivery, so a handle from a lapsed lease cannot delete
/// a message that another consumer now owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    pub(crate) message_id: String,
    pub(crate) receipt: String,
}

/// One received message: raw body, delivery handle, and the transport-owned
/// count of how many times this message has been delivered.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: String,
    pub handle: DeliveryHandle,
    pub dequeue_count: u32,
}

/// Durable, at-least-once message channel with per-message visibility
/// timeout and a secondary poison channel.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueues a job message.
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Receives up to `max_messages` currently-visible messages, hiding each
    /// for `visibility_timeout` and incrementing its dequeue count.
    async fn receive_batch(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Deletes a message by its most recent delivery handle.
    async fn delete(&self, handle: &DeliveryHandle) -> Result<(), QueueError>;

    /// Sends a payload to the poison channel.
    async fn send_to_poison(&self, payload: &str) -> Result<(), QueueError>;
}
