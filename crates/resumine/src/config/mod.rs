//! Runtime configuration: a JSON file validated against an embedded schema.

pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    Config, DatabaseConfig, DocumentsConfig, InferenceConfig, QueueConfig, TemplatesConfig,
};

use std::path::PathBuf;

/// Returns the canonical config path: `~/.resumine/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".resumine").join("config.json"))
}
