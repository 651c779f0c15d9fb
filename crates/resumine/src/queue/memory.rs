//! In-memory queue transport.
//!
//! Models the durable transport's semantics (visibility timeout leasing,
//! dequeue counting, per-delivery receipts, and a poison channel) behind a
//! `Mutex`. Suitable for local runs and tests; a hosted queue service
//! implements the same trait in production deployments.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Delivery, DeliveryHandle, JobMessage, QueueError, QueueTransport};

struct StoredMessage {
    id: String,
    body: String,
    dequeue_count: u32,
    /// The message is hidden from consumers until this instant.
    visible_at: Instant,
    /// Receipt of the most recent delivery; `None` until first received.
    receipt: Option<String>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<StoredMessage>,
    poison: Vec<String>,
}

/// Mutex-guarded in-memory queue. No awaits happen while the lock is held.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Transport("queue lock poisoned".to_string()))
    }

    /// Number of messages currently stored (visible or leased).
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the poison channel, for inspection.
    pub fn poison_messages(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.poison.clone())
            .unwrap_or_default()
    }

    /// Enqueues a raw body, bypassing `JobMessage` serialization. Mirrors a
    /// foreign producer writing to the same queue; used to exercise
    /// malformed-payload handling.
    pub fn push_raw(&self, body: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.messages.push(StoredMessage {
                id: Uuid::new_v4().to_string(),
                body: body.to_string(),
                dequeue_count: 0,
                visible_at: Instant::now(),
                receipt: None,
            });
        }
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        let body = serde_json::to_string(message)?;
        let mut inner = self.lock()?;
        inner.messages.push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            body,
            dequeue_count: 0,
            visible_at: Instant::now(),
            receipt: None,
        });
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        let mut batch = Vec::new();
        for message in inner.messages.iter_mut() {
            if batch.len() >= max_messages {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            message.visible_at = now + visibility_timeout;
            message.dequeue_count += 1;
            let receipt = Uuid::new_v4().to_string();
            message.receipt = Some(receipt.clone());

            batch.push(Delivery {
                body: message.body.clone(),
                handle: DeliveryHandle {
                    message_id: message.id.clone(),
                    receipt,
                },
                dequeue_count: message.dequeue_count,
            });
        }

        Ok(batch)
    }

    async fn delete(&self, handle: &DeliveryHandle) -> Result<(), QueueError> {
        let mut inner = self.lock()?;

        let position = inner
            .messages
            .iter()
            .position(|m| m.id == handle.message_id)
            .ok_or_else(|| QueueError::UnknownHandle(handle.message_id.clone()))?;

        if inner.messages[position].receipt.as_deref() != Some(handle.receipt.as_str()) {
            return Err(QueueError::StaleReceipt {
                message_id: handle.message_id.clone(),
            });
        }

        inner.messages.remove(position);
        Ok(())
    }

    async fn send_to_poison(&self, payload: &str) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        inner.poison.push(payload.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(record: &str) -> JobMessage {
        JobMessage {
            record_id: record.to_string(),
            owner_id: "owner-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_receive_delete() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&message("r1")).await.unwrap();

        let batch = queue
            .receive_batch(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].dequeue_count, 1);

        let parsed: JobMessage = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(parsed, message("r1"));

        queue.delete(&batch[0].handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_received_message_is_invisible_until_timeout() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&message("r1")).await.unwrap();

        let first = queue
            .receive_batch(10, Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Leased: a second receive sees nothing.
        let hidden = queue
            .receive_batch(10, Duration::from_millis(40))
            .await
            .unwrap();
        assert!(hidden.is_empty());

        // After the visibility timeout it reappears with a bumped count.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = queue
            .receive_batch(10, Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
    }

    #[tokio::test]
    async fn test_stale_receipt_cannot_delete() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&message("r1")).await.unwrap();

        let first = queue
            .receive_batch(10, Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Message re-leased by "another consumer".
        let second = queue
            .receive_batch(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);

        let err = queue.delete(&first[0].handle).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleReceipt { .. }));

        // The current lease holder can still delete.
        queue.delete(&second[0].handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_batch_respects_max_messages() {
        let queue = InMemoryQueue::new();
        for i in 0..5 {
            queue.enqueue(&message(&format!("r{}", i))).await.unwrap();
        }

        let batch = queue
            .receive_batch(3, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.len(), 5);
    }

    #[tokio::test]
    async fn test_poison_channel_collects_payloads() {
        let queue = InMemoryQueue::new();
        queue.send_to_poison(r#"{"bad":"payload"}"#).await.unwrap();
        assert_eq!(queue.poison_messages().len(), 1);
    }
}
