//! Where signing material is read from

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use walletpass_core::{PassError, Result};

use crate::storage::ArtifactStore;

/// Key prefix of material kept in an object store
pub const CERTIFICATE_PREFIX: &str = "certificates";

/// Raw access to named pieces of signing material
#[async_trait]
pub trait MaterialSource: Send + Sync + Debug {
    /// Read the named file; [`PassError::CertificateUnavailable`] when it
    /// cannot be located or read
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

fn unavailable(name: &str, reason: impl Into<String>) -> PassError {
    PassError::CertificateUnavailable {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(unavailable(name, "not a plain file name"));
    }
    Ok(())
}

/// Material in a local directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Read material from files directly under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MaterialSource for DirectorySource {
    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        check_name(name)?;
        let path = self.root.join(name);
        debug!(path = %path.display(), "Reading signing material");
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => unavailable(name, format!("{} not found", path.display())),
            _ => unavailable(name, format!("{}: {}", path.display(), e)),
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Material under `certificates/` in an artifact store
#[derive(Debug, Clone)]
pub struct ObjectStoreSource {
    store: Arc<dyn ArtifactStore>,
}

impl ObjectStoreSource {
    /// Read material through `store`
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MaterialSource for ObjectStoreSource {
    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        check_name(name)?;
        let key = format!("{}/{}", CERTIFICATE_PREFIX, name);
        debug!(key = %key, "Fetching signing material");
        match self.store.get(&key).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(unavailable(name, format!("no object at {}", key))),
            Err(e) => Err(unavailable(name, e.to_string())),
        }
    }

    fn describe(&self) -> String {
        self.store.url_for(CERTIFICATE_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_directory_source_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wwdr.pem"), b"pem").unwrap();
        let source = DirectorySource::new(dir.path());

        assert_eq!(source.read("wwdr.pem").await.unwrap(), b"pem");
        let err = source.read("signerCert.pem").await.unwrap_err();
        assert!(matches!(err, PassError::CertificateUnavailable { ref name, .. } if name == "signerCert.pem"));
    }

    #[tokio::test]
    async fn test_names_with_separators_are_rejected() {
        let source = DirectorySource::new("/srv/certificates");
        for name in ["../signerKey.key", "nested/wwdr.pem", "", ".."] {
            assert!(matches!(
                source.read(name).await,
                Err(PassError::CertificateUnavailable { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_object_store_source_uses_certificate_prefix() {
        let store = Arc::new(MemoryStore::new());
        store.put("certificates/wwdr.pem", b"pem".to_vec(), "application/x-pem-file").await.unwrap();
        let source = ObjectStoreSource::new(store);

        assert_eq!(source.read("wwdr.pem").await.unwrap(), b"pem");
        assert!(matches!(
            source.read("signerKey.key").await,
            Err(PassError::CertificateUnavailable { .. })
        ));
        assert_eq!(source.describe(), "memory://artifacts/certificates");
    }
}
