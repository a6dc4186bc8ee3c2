//! Error types for wallet pass generation

use thiserror::Error;

/// Result type alias using PassError
pub type Result<T> = std::result::Result<T, PassError>;

/// Errors that can occur while generating a wallet pass
///
/// Every component surfaces its own kind unchanged so callers can tell
/// "retry me" from "fix your input" from "fix the configuration".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    /// A required definition field is missing or malformed
    #[error("Invalid pass definition: {0}")]
    InvalidPassDefinition(String),

    /// Signing material could not be located or read
    #[error("Certificate '{name}' unavailable: {reason}")]
    CertificateUnavailable { name: String, reason: String },

    /// Signing material was found but could not be parsed
    #[error("Certificate '{name}' could not be loaded: {reason}")]
    CertificateLoadError { name: String, reason: String },

    /// Producing a signature failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// The remote wallet service rejected or failed a request
    #[error("Registrar error: {0}")]
    RegistrarError(String),

    /// A remote object already exists for this serial number
    #[error("Object '{0}' already exists")]
    DuplicateObject(String),

    /// Durable storage rejected or failed an upload
    #[error("Publish failed for '{key}': {reason}")]
    PublishError { key: String, reason: String },

    /// QR rendering failed (usually oversized input)
    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// How a caller should react to a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient remote fault; retrying the whole request is safe
    Retry,
    /// The input must change before retrying
    FixInput,
    /// An operator must fix configuration or signing material
    FixConfiguration,
}

impl PassError {
    /// Classify this error for retry decisions
    pub fn disposition(&self) -> Disposition {
        match self {
            PassError::RegistrarError(_) | PassError::PublishError { .. } => Disposition::Retry,
            PassError::InvalidPassDefinition(_)
            | PassError::DuplicateObject(_)
            | PassError::EncodingError(_) => Disposition::FixInput,
            PassError::CertificateUnavailable { .. }
            | PassError::CertificateLoadError { .. }
            | PassError::SigningFailed(_) => Disposition::FixConfiguration,
        }
    }

    /// Short stable name of the error kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PassError::InvalidPassDefinition(_) => "invalid_pass_definition",
            PassError::CertificateUnavailable { .. } => "certificate_unavailable",
            PassError::CertificateLoadError { .. } => "certificate_load_error",
            PassError::SigningFailed(_) => "signing_failed",
            PassError::RegistrarError(_) => "registrar_error",
            PassError::DuplicateObject(_) => "duplicate_object",
            PassError::PublishError { .. } => "publish_error",
            PassError::EncodingError(_) => "encoding_error",
        }
    }
}

impl From<openssl::error::ErrorStack> for PassError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        PassError::SigningFailed(err.to_string())
    }
}

impl From<zip::result::ZipError> for PassError {
    fn from(err: zip::result::ZipError) -> Self {
        PassError::SigningFailed(format!("archive: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_classes() {
        assert_eq!(
            PassError::PublishError { key: "k".into(), reason: "503".into() }.disposition(),
            Disposition::Retry
        );
        assert_eq!(
            PassError::DuplicateObject("issuer.WT-1".into()).disposition(),
            Disposition::FixInput
        );
        assert_eq!(
            PassError::CertificateLoadError { name: "wwdr.pem".into(), reason: "bad".into() }
                .disposition(),
            Disposition::FixConfiguration
        );
    }

    #[test]
    fn test_kind_names_are_distinct() {
        let errors = [
            PassError::InvalidPassDefinition(String::new()),
            PassError::CertificateUnavailable { name: String::new(), reason: String::new() },
            PassError::CertificateLoadError { name: String::new(), reason: String::new() },
            PassError::SigningFailed(String::new()),
            PassError::RegistrarError(String::new()),
            PassError::DuplicateObject(String::new()),
            PassError::PublishError { key: String::new(), reason: String::new() },
            PassError::EncodingError(String::new()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(PassError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }
}
