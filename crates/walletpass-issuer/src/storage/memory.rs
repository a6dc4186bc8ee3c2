//! In-memory storage backend
//!
//! Keeps artifacts in a hashmap. Suitable for tests and dry runs.
//! Data is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ArtifactStore, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory artifact store
#[derive(Debug)]
pub struct MemoryStore {
    base_url: String,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    /// Create an empty store with `memory://` URLs
    pub fn new() -> Self {
        Self {
            base_url: "memory://artifacts".to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different URL prefix
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Content type recorded for `key`
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|o| o.content_type.clone())
    }

    /// All stored keys
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Key for a URL produced by this store
    pub fn key_for_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.base_url.as_str())?.strip_prefix('/')
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        debug!(key = %key, size = bytes.len(), "Storing artifact in memory");
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.objects.read().await.get(key).map(|o| o.bytes.clone()))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overwrite_keeps_second_content() {
        let store = MemoryStore::new();
        store.put("k", b"first".to_vec(), "text/plain").await.unwrap();
        store.put("k", b"second".to_vec(), "application/octet-stream").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.content_type("k").await.as_deref(), Some("application/octet-stream"));
        assert_eq!(store.keys().await, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[test]
    fn test_url_roundtrip() {
        let store = MemoryStore::new().with_base_url("https://cdn.test/");
        let url = store.url_for("qr-codes/a.png");
        assert_eq!(url, "https://cdn.test/qr-codes/a.png");
        assert_eq!(store.key_for_url(&url), Some("qr-codes/a.png"));
        assert_eq!(store.key_for_url("https://elsewhere/x"), None);
    }
}
