//! Unified secret resolution from multiple sources.
//!
//! Secrets (the inference API key, the grant-sealing key) resolve from
//! multiple sources in priority order, supporting flexible deployment
//! scenarios:
//!
//! 1. **Direct value** - For quick local testing
//! 2. **File reference** - For Docker secrets pattern (e.g. `/run/secrets/api_key`)
//! 3. **Env var reference** - For Kubernetes/production

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from multiple sources in priority order:
/// 1. Direct value (if provided and non-empty)
/// 2. File contents (if path provided)
/// 3. Environment variable (if name provided)
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    // Priority 1: Direct value
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    // Priority 2: File
    if let Some(path) = file_path {
        if !path.is_empty() {
            match fs::read_to_string(path) {
                Ok(content) => return Ok(SecretString::from(content.trim().to_string())),
                Err(e) => {
                    return Err(SecretError::FileReadError {
                        path: path.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    // Priority 3: Environment variable
    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            match std::env::var(var_name) {
                Ok(value) => return Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => {
                    return Err(SecretError::EnvVarNotSet {
                        name: var_name.to_string(),
                    })
                }
                Err(std::env::VarError::NotUnicode(_)) => {
                    return Err(SecretError::EnvVarNotUnicode {
                        name: var_name.to_string(),
                    })
                }
            }
        }
    }

    Err(SecretError::NoSourceProvided)
}
