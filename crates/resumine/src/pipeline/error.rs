use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Analysis record {id} not found")]
    RecordNotFound { id: String },

    #[error("Document access failed: {0}")]
    Document(#[from] crate::docstore::DocStoreError),

    #[error("Text extraction failed: {0}")]
    Extraction(#[from] crate::extract::ExtractError),

    #[error("Inference failed: {0}")]
    Inference(#[from] crate::inference::InferenceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl PipelineError {
    /// Terminal errors poison the message immediately; everything else is
    /// transient and retried via the queue's visibility timeout.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineError::RecordNotFound { .. })
    }
}
