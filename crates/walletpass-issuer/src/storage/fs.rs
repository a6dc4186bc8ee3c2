//! Local directory storage backend
//!
//! Content is written to a temporary sibling file and renamed into place,
//! so readers only ever see complete artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{validate_key, ArtifactStore, StorageError};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Artifact store rooted at a local directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl DirectoryStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve URLs from `base_url` instead of `file://` paths
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let temp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::Io(format!("{}: {}", temp.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::Io(format!("{}: {}", path.display(), e)));
        }

        debug!(path = %path.display(), size = bytes.len(), "Wrote artifact");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    fn url_for(&self, key: &str) -> String {
        match self.public_base_url {
            Some(ref base) => format!("{}/{}", base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
