//! Signing material for binary passes
//!
//! The intermediate authority certificate, signer certificate and signer
//! key are read once from a [`MaterialSource`] and shared by all requests.

pub mod provider;
pub mod source;

pub use provider::CertificateProvider;
pub use source::{DirectorySource, MaterialSource, ObjectStoreSource};

/// File names of the three pieces of signing material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateNames {
    /// Intermediate authority certificate (PEM)
    pub intermediate: String,
    /// Signer certificate (PEM)
    pub signer_cert: String,
    /// Signer private key (PEM, optionally encrypted)
    pub signer_key: String,
}

impl Default for CertificateNames {
    fn default() -> Self {
        Self {
            intermediate: "wwdr.pem".to_string(),
            signer_cert: "signerCert.pem".to_string(),
            signer_key: "signerKey.key".to_string(),
        }
    }
}
