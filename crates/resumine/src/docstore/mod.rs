//! Document store issuing short-lived, read-only access grants.
//!
//! A [`ReadGrant`] is the analog of a signed storage URL: it is scoped to a
//! single document, time-boxed, generated on demand, and never persisted.
//! The grant token is an AES-256-GCM-sealed claims blob, so a holder cannot
//! extend its lifetime or point it at another document.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the 64-char hex grant-sealing key.
pub const GRANT_KEY_ENV_VAR: &str = "RESUMINE_GRANT_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Errors from document store operations.
#[derive(Error, Debug)]
pub enum DocStoreError {
    #[error("Invalid grant key: {0}")]
    InvalidKey(String),

    #[error("Failed to seal grant token: {0}")]
    Seal(String),

    #[error("Grant token rejected: {0}")]
    TokenInvalid(String),

    #[error("Grant for '{document_ref}' expired at {expired_at}")]
    GrantExpired {
        document_ref: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Invalid document reference '{0}'")]
    InvalidRef(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A short-lived, read-only credential for one stored document.
#[derive(Debug, Clone)]
pub struct ReadGrant {
    pub document_ref: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Raw document bytes plus the stored filename (used for format dispatch).
#[derive(Debug, Clone)]
pub struct DocumentContent {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// Collaborator holding submitted documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Issues a time-boxed read grant for a document.
    async fn issue_read_grant(&self, document_ref: &str) -> Result<ReadGrant, DocStoreError>;

    /// Redeems a grant, verifying its token and expiry, and returns the
    /// document content.
    async fn fetch(&self, grant: &ReadGrant) -> Result<DocumentContent, DocStoreError>;
}

/// The claims sealed into a grant token.
#[derive(Debug, Serialize, Deserialize)]
struct GrantClaims {
    document_ref: String,
    expires_at: DateTime<Utc>,
}

/// Seals and unseals grant claims with AES-256-GCM.
///
/// Token format: `<12-byte nonce><ciphertext>`, hex-encoded.
pub struct GrantSealer {
    cipher: Aes256Gcm,
}

impl GrantSealer {
    /// Creates a sealer from a 64-character hex string (32 bytes decoded).
    pub fn from_hex_key(key_hex: &str) -> Result<Self, DocStoreError> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| DocStoreError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(DocStoreError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| DocStoreError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    fn seal(&self, claims: &GrantClaims) -> Result<String, DocStoreError> {
        let plaintext =
            serde_json::to_vec(claims).map_err(|e| DocStoreError::Seal(e.to_string()))?;

        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| DocStoreError::Seal(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(hex_encode(&combined))
    }

    fn unseal(&self, token: &str) -> Result<GrantClaims, DocStoreError> {
        let combined = hex_decode(token)
            .map_err(|e| DocStoreError::TokenInvalid(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(DocStoreError::TokenInvalid("Token too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| DocStoreError::TokenInvalid("Authentication failed".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| DocStoreError::TokenInvalid(format!("Malformed claims: {}", e)))
    }
}

/// Filesystem-backed document store rooted at a single directory.
pub struct FsDocumentStore {
    root: PathBuf,
    sealer: GrantSealer,
    grant_ttl: Duration,
}

impl FsDocumentStore {
    pub fn new<P: AsRef<Path>>(root: P, sealer: GrantSealer, grant_ttl: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sealer,
            grant_ttl,
        }
    }

    /// Resolves a document reference to a path under the root, rejecting
    /// absolute paths and parent-directory traversal.
    fn resolve_ref(&self, document_ref: &str) -> Result<PathBuf, DocStoreError> {
        if document_ref.is_empty() {
            return Err(DocStoreError::InvalidRef(document_ref.to_string()));
        }
        let relative = Path::new(document_ref);
        let traversal = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if traversal {
            return Err(DocStoreError::InvalidRef(document_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn issue_read_grant(&self, document_ref: &str) -> Result<ReadGrant, DocStoreError> {
        let path = self.resolve_ref(document_ref)?;
        if !path.is_file() {
            return Err(DocStoreError::NotFound(document_ref.to_string()));
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.grant_ttl)
                .map_err(|e| DocStoreError::Seal(e.to_string()))?;
        let claims = GrantClaims {
            document_ref: document_ref.to_string(),
            expires_at,
        };

        Ok(ReadGrant {
            document_ref: document_ref.to_string(),
            token: self.sealer.seal(&claims)?,
            expires_at,
        })
    }

    async fn fetch(&self, grant: &ReadGrant) -> Result<DocumentContent, DocStoreError> {
        let claims = self.sealer.unseal(&grant.token)?;

        if claims.document_ref != grant.document_ref {
            return Err(DocStoreError::TokenInvalid(
                "Grant does not match this document".to_string(),
            ));
        }
        if Utc::now() > claims.expires_at {
            return Err(DocStoreError::GrantExpired {
                document_ref: grant.document_ref.clone(),
                expired_at: claims.expires_at,
            });
        }

        let path = self.resolve_ref(&claims.document_ref)?;
        let bytes = std::fs::read(&path).map_err(|e| DocStoreError::ReadDocument {
            path: path.clone(),
            source: e,
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        Ok(DocumentContent { bytes, filename })
    }
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes a hex string to bytes.
fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using getrandom.
fn rand_bytes<const N: usize>() -> Result<[u8; N], DocStoreError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| DocStoreError::Seal(format!("Failed to generate random bytes: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f";

    fn store_with_doc(ttl: Duration) -> (TempDir, FsDocumentStore) {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("resume.txt")).unwrap();
        writeln!(file, "Software Engineer with 5 years experience").unwrap();

        let sealer = GrantSealer::from_hex_key(TEST_KEY).unwrap();
        let store = FsDocumentStore::new(dir.path(), sealer, ttl);
        (dir, store)
    }

    #[tokio::test]
    async fn test_issue_and_fetch() {
        let (_dir, store) = store_with_doc(Duration::from_secs(60));
        let grant = store.issue_read_grant("resume.txt").await.unwrap();
        assert!(grant.expires_at > Utc::now());

        let content = store.fetch(&grant).await.unwrap();
        assert_eq!(content.filename, "resume.txt");
        assert!(!content.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let (_dir, store) = store_with_doc(Duration::from_secs(60));
        let err = store.issue_read_grant("missing.txt").await.unwrap_err();
        assert!(matches!(err, DocStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_refs_rejected() {
        let (_dir, store) = store_with_doc(Duration::from_secs(60));
        for bad in ["../etc/passwd", "/etc/passwd", ""] {
            let err = store.issue_read_grant(bad).await.unwrap_err();
            assert!(matches!(err, DocStoreError::InvalidRef(_)), "ref: {}", bad);
        }
    }

    #[tokio::test]
    async fn test_expired_grant_rejected() {
        let (_dir, store) = store_with_doc(Duration::from_millis(1));
        let grant = store.issue_read_grant("resume.txt").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = store.fetch(&grant).await.unwrap_err();
        assert!(matches!(err, DocStoreError::GrantExpired { .. }));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let (_dir, store) = store_with_doc(Duration::from_secs(60));
        let mut grant = store.issue_read_grant("resume.txt").await.unwrap();

        // Flip one hex digit in the ciphertext.
        let mut chars: Vec<char> = grant.token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        grant.token = chars.into_iter().collect();

        let err = store.fetch(&grant).await.unwrap_err();
        assert!(matches!(err, DocStoreError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn test_grant_scoped_to_one_document() {
        let (dir, store) = store_with_doc(Duration::from_secs(60));
        std::fs::write(dir.path().join("other.txt"), "other").unwrap();

        let mut grant = store.issue_read_grant("resume.txt").await.unwrap();
        grant.document_ref = "other.txt".to_string();

        let err = store.fetch(&grant).await.unwrap_err();
        assert!(matches!(err, DocStoreError::TokenInvalid(_)));
    }

    #[test]
    fn test_sealer_requires_valid_key() {
        assert!(GrantSealer::from_hex_key("deadbeef").is_err());
        assert!(GrantSealer::from_hex_key("zz").is_err());
        assert!(GrantSealer::from_hex_key(TEST_KEY).is_ok());
    }
}
