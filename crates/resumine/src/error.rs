use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResumineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Document store error: {0}")]
    Document(#[from] crate::docstore::DocStoreError),

    #[error("Extraction error: {0}")]
    Extract(#[from] crate::extract::ExtractError),

    #[error("Inference error: {0}")]
    Inference(#[from] crate::inference::InferenceError),

    #[error("Template error: {0}")]
    Template(#[from] crate::templates::TemplateError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Producer error: {0}")]
    Producer(#[from] crate::producer::ProducerError),

    #[error("Secret resolution error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, ResumineError>;
