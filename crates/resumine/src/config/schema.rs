use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path. Defaults to `~/.resumine/data/resumine.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Root directory holding submitted documents.
    pub root: String,
    /// Read-grant lifetime in seconds.
    #[serde(default = "default_grant_ttl_secs")]
    pub grant_ttl_secs: u64,
    /// Grant-sealing key (64-char hex). Resolved in priority order:
    /// direct value, file, environment variable.
    #[serde(default)]
    pub grant_key: Option<String>,
    #[serde(default)]
    pub grant_key_file: Option<String>,
    #[serde(default = "default_grant_key_env")]
    pub grant_key_env: Option<String>,
}

fn default_grant_ttl_secs() -> u64 {
    3600
}

fn default_grant_key_env() -> Option<String> {
    Some(crate::docstore::GRANT_KEY_ENV_VAR.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
}

fn default_batch_size() -> usize {
    8
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_dequeue_count() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_dequeue_count: default_max_dequeue_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Inference service endpoint URL.
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// API key. Resolved in priority order: direct value, file, env var.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum characters of extracted text sent for analysis.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("RESUMINE_API_KEY".to_string())
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_content_length() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_agent_type() -> String {
    "resume-analyzer".to_string()
}

fn default_task_type() -> String {
    "analysis".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            agent_type: default_agent_type(),
            task_type: default_task_type(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}
