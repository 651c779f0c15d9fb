//! Job producer, the entry collaborator.
//!
//! Persists an initial `pending` record for a validated submission and
//! enqueues the matching job message.

use std::sync::Arc;

use thiserror::Error;

use crate::db::record_repo::{self, AnalysisRecord};
use crate::db::{Database, DatabaseError};
use crate::queue::{JobMessage, QueueError, QueueTransport};

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub struct JobProducer {
    db: Database,
    queue: Arc<dyn QueueTransport>,
}

impl JobProducer {
    pub fn new(db: Database, queue: Arc<dyn QueueTransport>) -> Self {
        Self { db, queue }
    }

    /// Creates a pending analysis record for a stored document and enqueues
    /// its job. Returns the new record.
    pub async fn submit(
        &self,
        owner_id: &str,
        document_ref: &str,
        filename: Option<&str>,
    ) -> Result<AnalysisRecord, ProducerError> {
        let record = AnalysisRecord::new(owner_id, document_ref, filename);
        record_repo::insert(&self.db, &record)?;

        self.queue
            .enqueue(&JobMessage {
                record_id: record.id.clone(),
                owner_id: owner_id.to_string(),
            })
            .await?;

        log::info!("Queued analysis job {} for owner {}", record.id, owner_id);
        Ok(record)
    }
}
