pub mod config;
pub mod db;
pub mod docstore;
pub mod error;
pub mod extract;
pub mod inference;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod secrets;
pub mod templates;
pub mod worker;

pub use config::{default_config_path, load_config, Config};
pub use db::{Database, DatabaseError};
pub use docstore::{DocumentStore, FsDocumentStore, GrantSealer};
pub use error::{ConfigError, Result, ResumineError};
pub use extract::ExtractorRegistry;
pub use inference::{HttpInferenceClient, InferenceClient};
pub use pipeline::{AnalysisPipeline, PipelineError, PipelineOptions};
pub use producer::JobProducer;
pub use queue::{InMemoryQueue, JobMessage, PoisonMessage, QueueTransport};
pub use secrets::{resolve_secret, SecretError};
pub use templates::{TemplateCache, TemplateKey, TemplateStore};
pub use worker::{AnalysisWorker, WorkerOptions};
