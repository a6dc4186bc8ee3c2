//! Service account credentials and OAuth access tokens
//!
//! The wallet service authenticates issuers with a service account: a JWT
//! bearer assertion signed with the account's RSA key is exchanged at the
//! token endpoint for a short-lived access token.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistrarError, Result};

/// OAuth scope granting issuer access to wallet objects
pub const WALLET_SCOPE: &str = "https://www.googleapis.com/auth/wallet_object.issuer";

/// Default token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this many seconds before they expire
const REFRESH_MARGIN_SECS: i64 = 60;

/// Service account key file contents
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    /// Account email; the issuer of every token this account signs
    pub client_email: String,

    /// PEM-encoded RSA private key
    pub private_key: String,

    /// Key identifier placed in token headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,

    /// Token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Create a key from its parts
    pub fn new(client_email: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            client_email: client_email.into(),
            private_key: private_key.into(),
            private_key_id: None,
            token_uri: default_token_uri(),
        }
    }

    /// Override the token endpoint
    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_uri = uri.into();
        self
    }

    /// Parse a downloaded key file
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RegistrarError::InvalidKey(e.to_string()))
    }

    /// Read and parse a key file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RegistrarError::InvalidKey(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&bytes)
    }

    /// Signing key for RS256 tokens
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        Ok(EncodingKey::from_rsa_pem(self.private_key.as_bytes())?)
    }

    /// RS256 header carrying this key's id
    pub fn header(&self) -> Header {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        header
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// A bearer token and the moment it stops being usable
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Exchanges service account assertions for access tokens, with caching
///
/// Concurrent callers share a single in-flight exchange; failures are not
/// cached.
pub struct TokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http_client: reqwest::Client,
    cache: Cache<String, Arc<AccessToken>>,
}

impl TokenSource {
    /// Create a token source, failing early on a malformed key
    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        Self::with_client(key, reqwest::Client::new())
    }

    /// Create a token source using an existing HTTP client
    pub fn with_client(key: ServiceAccountKey, http_client: reqwest::Client) -> Result<Self> {
        let encoding_key = key.encoding_key()?;
        Ok(Self {
            key,
            encoding_key,
            http_client,
            cache: Cache::builder().max_capacity(1).build(),
        })
    }

    /// The account this source authenticates as
    pub fn account(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// Get a usable access token, exchanging a new assertion when needed
    pub async fn access_token(&self) -> Result<String> {
        if let Some(cached) = self.cache.get(WALLET_SCOPE).await {
            if cached.is_fresh() {
                debug!(account = %self.key.client_email, "Using cached access token");
                return Ok(cached.token.clone());
            }
            self.cache.invalidate(WALLET_SCOPE).await;
        }

        let token = self
            .cache
            .try_get_with(WALLET_SCOPE.to_string(), async { self.exchange().await.map(Arc::new) })
            .await
            .map_err(|e: Arc<RegistrarError>| (*e).clone())?;
        Ok(token.token.clone())
    }

    fn assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: WALLET_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        Ok(encode(&self.key.header(), &claims, &self.encoding_key)?)
    }

    async fn exchange(&self) -> Result<AccessToken> {
        let assertion = self.assertion()?;
        debug!(token_uri = %self.key.token_uri, "Exchanging service account assertion");

        let response = self
            .http_client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrarError::Auth(format!("{}: {}", status, body)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistrarError::Auth(e.to_string()))?;

        let lifetime = chrono::Duration::seconds(body.expires_in as i64);
        Ok(AccessToken {
            token: body.access_token,
            expires_at: Utc::now() + lifetime,
        })
    }
}
