//! resumine worker daemon.
//!
//! Loads configuration, wires the pipeline components, and runs the
//! queue-polling analysis worker until Ctrl-C.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tracing_subscriber::EnvFilter;

use resumine::db::Database;
use resumine::docstore::{FsDocumentStore, GrantSealer};
use resumine::extract::ExtractorRegistry;
use resumine::inference::HttpInferenceClient;
use resumine::pipeline::{AnalysisPipeline, PipelineOptions};
use resumine::queue::InMemoryQueue;
use resumine::secrets::resolve_secret;
use resumine::templates::{TemplateCache, TemplateKey, TemplateStore};
use resumine::worker::{AnalysisWorker, WorkerOptions};
use resumine::{Config, ConfigError, ResumineError};

fn init_logging() {
    // Bridge `log` macro output into tracing, then emit everything through
    // one fmt subscriber controlled by RUST_LOG.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to initialize log bridge: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    resumine::default_config_path().ok_or(ConfigError::Validation {
        message: "No config path given and no home directory available".to_string(),
    })
}

fn build_pipeline(config: &Config, db: Database) -> Result<AnalysisPipeline, ResumineError> {
    use secrecy::ExposeSecret;

    let grant_key = resolve_secret(
        config.documents.grant_key.as_deref(),
        config.documents.grant_key_file.as_deref(),
        config.documents.grant_key_env.as_deref(),
    )?;
    let sealer = GrantSealer::from_hex_key(grant_key.expose_secret())?;
    let documents = Arc::new(FsDocumentStore::new(
        &config.documents.root,
        sealer,
        Duration::from_secs(config.documents.grant_ttl_secs),
    ));

    let templates = Arc::new(TemplateStore::new(
        db.clone(),
        TemplateCache::new(Duration::from_secs(config.templates.cache_ttl_secs)),
    ));

    let api_key = resolve_secret(
        config.inference.api_key.as_deref(),
        config.inference.api_key_file.as_deref(),
        config.inference.api_key_env.as_deref(),
    )?;
    let inference = Arc::new(HttpInferenceClient::new(
        config.inference.endpoint.clone(),
        config.inference.model.clone(),
        api_key,
        Duration::from_secs(config.inference.request_timeout_secs),
    )?);

    Ok(AnalysisPipeline::new(
        db,
        documents,
        ExtractorRegistry::new(),
        templates,
        inference,
        PipelineOptions {
            environment: config.templates.environment.clone(),
            agent_type: config.templates.agent_type.clone(),
            task_type: config.templates.task_type.clone(),
            max_content_length: config.inference.max_content_length,
        },
    ))
}

#[tokio::main]
async fn main() -> resumine::Result<()> {
    init_logging();

    info!("Starting resumine worker v{}", env!("CARGO_PKG_VERSION"));

    let path = config_path()?;
    info!("Loading config from {}", path.display());
    let config = resumine::load_config(&path)?;

    let db_path = config
        .database
        .path
        .as_ref()
        .map(PathBuf::from)
        .or_else(resumine::db::default_database_path)
        .ok_or(ConfigError::Validation {
            message: "No database path configured and no home directory available".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let key = TemplateKey::new(
        config.templates.environment.clone(),
        config.templates.agent_type.clone(),
        config.templates.task_type.clone(),
    );
    info!(
        "Serving analyses for {}/{}/{}",
        key.environment, key.agent_type, key.task_type
    );

    let queue = Arc::new(InMemoryQueue::new());
    let pipeline = Arc::new(build_pipeline(&config, db.clone())?);

    let worker = AnalysisWorker::new(
        queue,
        pipeline,
        db,
        WorkerOptions {
            batch_size: config.queue.batch_size,
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
            poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
            max_dequeue_count: config.queue.max_dequeue_count,
        },
    );

    let shutdown = worker.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested, draining in-flight work...");
        shutdown.store(true, Ordering::Release);
    }) {
        log::error!("Failed to install Ctrl-C handler: {}", e);
    }

    worker.run().await;

    info!("resumine worker exited cleanly");
    Ok(())
}
