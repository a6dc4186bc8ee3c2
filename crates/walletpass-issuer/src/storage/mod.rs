//! Durable artifact storage
//!
//! Generated bundles and QR images are published under keys derived from
//! the serial number. Publishing an existing key replaces its content, and
//! a failed publish never leaves partial content under the key.
//!
//! Backends:
//! - [`MemoryStore`]: process memory, for tests and dry runs
//! - [`DirectoryStore`]: local directory, write-then-rename
//! - [`S3Store`]: S3 or any S3-compatible service (single `PutObject`)

pub mod fs;
pub mod memory;
pub mod s3;

pub use fs::DirectoryStore;
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use walletpass_core::{PassError, Platform, SerialNumber};

/// Content type of QR images
pub const QR_CONTENT_TYPE: &str = "image/png";

/// Error type for storage operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Storage backend for published artifacts
///
/// Implementations must be thread-safe; `put` must be all-or-nothing.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Store `bytes` under `key`, replacing any previous content
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Read the content under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Public URL of `key`
    fn url_for(&self, key: &str) -> String;
}

/// Check that a key is a relative, normalized path
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key is empty".into()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(format!("'{}' is not a relative path", key)));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(StorageError::InvalidKey(format!("'{}' has an empty or relative segment", key)));
    }
    Ok(())
}

/// Key of a published bundle
pub fn bundle_key(serial: &SerialNumber) -> String {
    format!("apple-passes/{}.pkpass", serial)
}

/// Key of a published QR image
pub fn qr_key(serial: &SerialNumber, platform: Platform) -> String {
    match platform {
        Platform::Apple => format!("qr-codes/{}_qr.png", serial),
        Platform::Google => format!("qr-codes/{}_google_qr.png", serial),
    }
}

/// Publishes artifacts and reports failures as [`PassError::PublishError`]
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactPublisher {
    /// Create a publisher over a store
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Publish `bytes` under `key` and return its public URL
    pub async fn publish(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> walletpass_core::Result<String> {
        let size = bytes.len();
        let result = match validate_key(key) {
            Ok(()) => self.store.put(key, bytes, content_type).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let url = self.store.url_for(key);
                info!(key = %key, size = size, url = %url, "Published artifact");
                Ok(url)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Publish failed");
                Err(PassError::PublishError {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
