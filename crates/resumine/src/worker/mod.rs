//! Queue-polling analysis worker.
//!
//! Polls the queue transport in a loop, runs the pipeline per message, and
//! decides each message's fate: delete on success or terminal failure (after
//! poisoning), leave undeleted on transient failure so the visibility
//! timeout re-surfaces it. Retry exhaustion is enforced via the transport's
//! dequeue count. Multiple worker processes can poll the same queue; the
//! visibility-timeout lease is the only mutual exclusion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::db::{record_repo, Database};
use crate::pipeline::AnalysisPipeline;
use crate::queue::{Delivery, JobMessage, PoisonMessage, QueueTransport};

/// Polling and retry knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Messages fetched per receive call.
    pub batch_size: usize,
    /// How long a received message stays hidden from other consumers.
    pub visibility_timeout: Duration,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Deliveries at or above this count are poisoned instead of processed.
    pub max_dequeue_count: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            max_dequeue_count: 5,
        }
    }
}

/// The polling consumer. One instance runs one loop; horizontal scale comes
/// from running more processes against the same queue.
pub struct AnalysisWorker {
    queue: Arc<dyn QueueTransport>,
    pipeline: Arc<AnalysisPipeline>,
    db: Database,
    options: WorkerOptions,
    shutdown: Arc<AtomicBool>,
}

impl AnalysisWorker {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        pipeline: Arc<AnalysisPipeline>,
        db: Database,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            pipeline,
            db,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed between iterations; set it to stop the loop after the
    /// in-flight batch drains.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the polling loop until shutdown is requested.
    pub async fn run(&self) {
        log::info!(
            "Analysis worker started (batch={}, visibility={}s, max_dequeue={})",
            self.options.batch_size,
            self.options.visibility_timeout.as_secs(),
            self.options.max_dequeue_count
        );

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            match self.poll_once().await {
                Ok(0) => tokio::time::sleep(self.options.poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to receive messages: {}", e);
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        }

        log::info!("Analysis worker stopped");
    }

    /// Receives one batch and handles every message in it. Returns the
    /// number of messages received. Received messages always drain, even if
    /// shutdown arrives mid-batch: their leases are already held.
    pub async fn poll_once(&self) -> Result<usize, crate::queue::QueueError> {
        let batch = self
            .queue
            .receive_batch(self.options.batch_size, self.options.visibility_timeout)
            .await?;

        let count = batch.len();
        for delivery in batch {
            self.handle_delivery(delivery).await;
        }
        Ok(count)
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let message: JobMessage = match serde_json::from_str(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Poisoning malformed job payload: {}", e);
                // Best-effort: mark the referenced record failed when the
                // payload is damaged but the id is still readable.
                if let Some(record_id) = partial_record_id(&delivery.body) {
                    self.fail_record(&record_id, "malformed job payload");
                }
                let poison =
                    PoisonMessage::from_raw(&delivery.body, format!("Malformed payload: {}", e));
                self.poison_and_delete(&delivery, &poison).await;
                return;
            }
        };

        if delivery.dequeue_count >= self.options.max_dequeue_count {
            log::warn!(
                "Job for record {} delivered {} times (max {}), poisoning",
                message.record_id,
                delivery.dequeue_count,
                self.options.max_dequeue_count
            );
            self.fail_record(&message.record_id, "max retries exceeded");
            let poison = PoisonMessage::from_message(&message, "max retries exceeded");
            self.poison_and_delete(&delivery, &poison).await;
            return;
        }

        match self
            .pipeline
            .process(&message.record_id, &message.owner_id)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.queue.delete(&delivery.handle).await {
                    log::error!(
                        "Failed to delete completed message for record {}: {}",
                        message.record_id,
                        e
                    );
                }
            }
            Err(e) if e.is_terminal() => {
                log::warn!(
                    "Terminal failure for record {}, poisoning: {}",
                    message.record_id,
                    e
                );
                self.fail_record(&message.record_id, &e.to_string());
                let poison = PoisonMessage::from_message(&message, e.to_string());
                self.poison_and_delete(&delivery, &poison).await;
            }
            Err(e) => {
                // Leave the message undeleted: the visibility timeout will
                // re-surface it for another attempt.
                log::error!(
                    "Transient failure for record {} (delivery {}): {}",
                    message.record_id,
                    delivery.dequeue_count,
                    e
                );
            }
        }
    }

    /// Sends the poison payload, then deletes the message. When the poison
    /// send itself fails the message is left undeleted, preserving
    /// at-least-once handling.
    async fn poison_and_delete(&self, delivery: &Delivery, poison: &PoisonMessage) {
        let payload = match serde_json::to_string(poison) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to serialize poison message: {}", e);
                return;
            }
        };

        if let Err(e) = self.queue.send_to_poison(&payload).await {
            log::error!("Failed to send poison message: {}", e);
            return;
        }
        if let Err(e) = self.queue.delete(&delivery.handle).await {
            log::error!("Failed to delete poisoned message: {}", e);
        }
    }

    fn fail_record(&self, record_id: &str, reason: &str) {
        match record_repo::mark_failed(&self.db, record_id, reason) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Record {} not marked failed (missing or analyzed)", record_id)
            }
            Err(e) => log::error!("Failed to mark record {} failed: {}", record_id, e),
        }
    }
}

/// Pulls a `recordId` out of a payload that failed full deserialization.
fn partial_record_id(payload: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()?
        .get("recordId")?
        .as_str()
        .map(ToString::to_string)
}
