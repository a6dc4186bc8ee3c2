//! Signed "save to wallet" links
//!
//! A save link is a short-lived RS256 token naming one or more registered
//! objects, appended to the wallet service's save URL.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::ServiceAccountKey;
use crate::error::{RegistrarError, Result};

/// How long a save link stays valid after issuance
pub const DEFAULT_SAVE_LINK_TTL: Duration = Duration::from_secs(3600);

/// URL the signed token is appended to
pub const SAVE_URL_PREFIX: &str = "https://pay.google.com/gp/v/save/";

/// Audience of save tokens
pub const SAVE_AUDIENCE: &str = "google";

/// Token type of save tokens
pub const SAVE_TOKEN_TYPE: &str = "savetowallet";

/// Reference to a registered object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub id: String,
}

/// Objects carried by a save token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub generic_objects: Vec<ObjectReference>,
}

/// Claims of a save token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveClaims {
    pub iss: String,
    pub aud: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    pub payload: SavePayload,
}

/// An issued save link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveLink {
    /// Full save URL
    pub url: String,
    /// Signed token embedded in the URL
    pub token: String,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Time after which the wallet service rejects the link
    pub expires_at: DateTime<Utc>,
}

/// Signs save links on behalf of a service account
pub struct SaveLinkSigner {
    issuer: String,
    header: Header,
    key: EncodingKey,
    ttl: Duration,
    origins: Vec<String>,
}

impl std::fmt::Debug for SaveLinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveLinkSigner")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("origins", &self.origins)
            .finish_non_exhaustive()
    }
}

impl SaveLinkSigner {
    /// Create a signer from a PEM-encoded RSA private key
    ///
    /// A malformed key fails here rather than at signing time.
    pub fn new(issuer: impl Into<String>, private_key_pem: &[u8]) -> Result<Self> {
        Ok(Self {
            issuer: issuer.into(),
            header: Header::new(jsonwebtoken::Algorithm::RS256),
            key: EncodingKey::from_rsa_pem(private_key_pem)?,
            ttl: DEFAULT_SAVE_LINK_TTL,
            origins: Vec::new(),
        })
    }

    /// Create a signer for a service account
    pub fn from_service_account(account: &ServiceAccountKey) -> Result<Self> {
        Ok(Self {
            issuer: account.client_email.clone(),
            header: account.header(),
            key: account.encoding_key()?,
            ttl: DEFAULT_SAVE_LINK_TTL,
            origins: Vec::new(),
        })
    }

    /// Override the validity window
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Restrict the web origins allowed to present the link
    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.origins = origins;
        self
    }

    /// Validity window of issued links
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a link for `object_ids`, issued now
    pub fn sign(&self, object_ids: &[String]) -> Result<SaveLink> {
        self.sign_at(object_ids, Utc::now())
    }

    /// Sign a link for `object_ids` as if issued at `issued_at`
    pub fn sign_at(&self, object_ids: &[String], issued_at: DateTime<Utc>) -> Result<SaveLink> {
        if object_ids.is_empty() {
            return Err(RegistrarError::InvalidInput(
                "a save link must reference at least one object".into(),
            ));
        }

        let iat = issued_at.timestamp();
        let exp = iat + self.ttl.as_secs() as i64;
        let claims = SaveClaims {
            iss: self.issuer.clone(),
            aud: SAVE_AUDIENCE.to_string(),
            typ: SAVE_TOKEN_TYPE.to_string(),
            iat,
            exp,
            origins: self.origins.clone(),
            payload: SavePayload {
                generic_objects: object_ids
                    .iter()
                    .map(|id| ObjectReference { id: id.clone() })
                    .collect(),
            },
        };

        let token = encode(&self.header, &claims, &self.key)?;
        debug!(objects = object_ids.len(), exp = exp, "Signed save link");

        Ok(SaveLink {
            url: format!("{}{}", SAVE_URL_PREFIX, token),
            token,
            issued_at: timestamp(iat)?,
            expires_at: timestamp(exp)?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| RegistrarError::Signing(format!("timestamp {} out of range", secs)))
}
