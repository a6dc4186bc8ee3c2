//! Cached, single-flight access to signing material
//!
//! Raw files are cached per name and the parsed [`SigningMaterial`] is
//! built once. Concurrent first requests share a single load. Failures are
//! never cached, so a later request retries from scratch.

use std::sync::Arc;

use moka::future::Cache;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use walletpass_core::{MaterialPart, PassError, Result, SigningMaterial};

use super::{CertificateNames, MaterialSource};

/// Loads and caches signing material
#[derive(Debug)]
pub struct CertificateProvider {
    source: Arc<dyn MaterialSource>,
    names: CertificateNames,
    passphrase: Option<String>,
    raw: Cache<String, Arc<Vec<u8>>>,
    material: OnceCell<Arc<SigningMaterial>>,
}

impl CertificateProvider {
    /// Create a provider with the default file names and no key passphrase
    pub fn new(source: Arc<dyn MaterialSource>) -> Self {
        Self {
            source,
            names: CertificateNames::default(),
            passphrase: None,
            raw: Cache::builder().max_capacity(16).build(),
            material: OnceCell::new(),
        }
    }

    /// Use different file names
    pub fn with_names(mut self, names: CertificateNames) -> Self {
        self.names = names;
        self
    }

    /// Decrypt the signer key with `passphrase`
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Configured file names
    pub fn names(&self) -> &CertificateNames {
        &self.names
    }

    /// Bytes of the named file, read from the source at most once
    pub async fn resolve(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.raw.get(name).await {
            debug!(name = %name, "Signing material cache hit");
            return Ok(bytes);
        }

        let source = self.source.clone();
        self.raw
            .try_get_with(name.to_string(), async move {
                let bytes = source.read(name).await?;
                if bytes.is_empty() {
                    return Err(PassError::CertificateLoadError {
                        name: name.to_string(),
                        reason: "file is empty".into(),
                    });
                }
                info!(name = %name, source = %source.describe(), size = bytes.len(), "Loaded signing material");
                Ok::<_, PassError>(Arc::new(bytes))
            })
            .await
            .map_err(|e: Arc<PassError>| {
                warn!(name = %name, error = %e, "Signing material unavailable");
                (*e).clone()
            })
    }

    /// Parsed material, built on first use
    pub async fn signing_material(&self) -> Result<Arc<SigningMaterial>> {
        let material = self
            .material
            .get_or_try_init(|| async {
                let intermediate = self.resolve(&self.names.intermediate).await?;
                let signer_cert = self.resolve(&self.names.signer_cert).await?;
                let signer_key = self.resolve(&self.names.signer_key).await?;

                let material = match SigningMaterial::from_pem(
                    &intermediate,
                    &signer_cert,
                    &signer_key,
                    self.passphrase.as_deref(),
                ) {
                    Ok(material) => material,
                    Err((part, reason)) => {
                        let name = match part {
                            MaterialPart::Intermediate => &self.names.intermediate,
                            MaterialPart::SignerCert => &self.names.signer_cert,
                            MaterialPart::SignerKey => &self.names.signer_key,
                        };
                        warn!(name = %name, error = %reason, "Signing material rejected");
                        // Rejected bytes must be read again once the source is fixed
                        self.forget_raw().await;
                        return Err(PassError::CertificateLoadError {
                            name: name.clone(),
                            reason,
                        });
                    }
                };
                Ok::<_, PassError>(Arc::new(material))
            })
            .await?;
        Ok(material.clone())
    }

    async fn forget_raw(&self) {
        for name in [
            &self.names.intermediate,
            &self.names.signer_cert,
            &self.names.signer_key,
        ] {
            self.raw.invalidate(name).await;
        }
    }
}
