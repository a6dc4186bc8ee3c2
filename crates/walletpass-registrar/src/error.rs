//! Error types for the wallet registrar

use thiserror::Error;
use walletpass_core::PassError;

/// Result type for registrar operations
pub type Result<T> = std::result::Result<T, RegistrarError>;

/// Errors that can occur while talking to the wallet service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    /// The remote resource already exists (HTTP 409)
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// An object was created a second time for the same serial
    #[error("Object already exists: {0}")]
    DuplicateObject(String),

    /// The remote resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The wallet service answered with an error status
    #[error("Wallet service returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Access token exchange failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Service account key material is missing or malformed
    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    /// Token signing failed
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Caller input cannot be registered
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The wallet service sent something unparseable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RegistrarError {
    fn from(err: reqwest::Error) -> Self {
        RegistrarError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for RegistrarError {
    fn from(err: serde_json::Error) -> Self {
        RegistrarError::InvalidResponse(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for RegistrarError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                RegistrarError::InvalidKey(err.to_string())
            }
            _ => RegistrarError::Signing(err.to_string()),
        }
    }
}

impl From<RegistrarError> for PassError {
    fn from(err: RegistrarError) -> Self {
        match err {
            RegistrarError::AlreadyExists(id) | RegistrarError::DuplicateObject(id) => {
                PassError::DuplicateObject(id)
            }
            RegistrarError::InvalidKey(_) | RegistrarError::Signing(_) => {
                PassError::SigningFailed(err.to_string())
            }
            RegistrarError::InvalidInput(msg) => PassError::InvalidPassDefinition(msg),
            other => PassError::RegistrarError(other.to_string()),
        }
    }
}
