//! Wallet service API access
//!
//! The registrar only depends on [`WalletApi`]. [`RestWalletApi`] talks to
//! the wallet objects REST service; [`InMemoryWalletApi`] keeps resources in
//! process memory for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{ServiceAccountKey, TokenSource};
use crate::error::{RegistrarError, Result};

/// Default REST endpoint of the wallet objects service
pub const DEFAULT_API_BASE: &str = "https://walletobjects.googleapis.com/walletobjects/v1";

/// Remote operations the registrar needs
///
/// Inserts return [`RegistrarError::AlreadyExists`] when the id is taken;
/// callers decide whether that is success.
#[async_trait]
pub trait WalletApi: Send + Sync {
    // =========================================================================
    // Classes
    // =========================================================================

    /// Insert a class resource
    async fn insert_class(&self, class: &Value) -> Result<()>;

    // =========================================================================
    // Objects
    // =========================================================================

    /// Insert an object resource, returning the stored representation
    async fn insert_object(&self, object: &Value) -> Result<Value>;

    /// Fetch an object by id
    async fn get_object(&self, object_id: &str) -> Result<Value>;

    /// Apply a partial update to an object, returning the result
    async fn patch_object(&self, object_id: &str, patch: &Value) -> Result<Value>;
}

fn resource_id(resource: &Value) -> Result<String> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| RegistrarError::InvalidInput("resource has no id".into()))
}

// =============================================================================
// REST
// =============================================================================

/// Wallet objects REST client authenticated with a service account
pub struct RestWalletApi {
    base_url: String,
    http_client: reqwest::Client,
    tokens: TokenSource,
}

impl RestWalletApi {
    /// Create a client for the public service
    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let http_client = reqwest::Client::new();
        Ok(Self {
            base_url: DEFAULT_API_BASE.to_string(),
            tokens: TokenSource::with_client(key, http_client.clone())?,
            http_client,
        })
    }

    /// Point at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, resource: &str) -> Result<Value> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        debug!(resource = %resource, status = %status, "Wallet API response");

        match status {
            s if s.is_success() => Ok(response.json().await?),
            StatusCode::CONFLICT => Err(RegistrarError::AlreadyExists(resource.to_string())),
            StatusCode::NOT_FOUND => Err(RegistrarError::NotFound(resource.to_string())),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(RegistrarError::Remote {
                    status: s.as_u16(),
                    message: remote_message(&body),
                })
            }
        }
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text
fn remote_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl WalletApi for RestWalletApi {
    async fn insert_class(&self, class: &Value) -> Result<()> {
        let id = resource_id(class)?;
        let request = self.http_client.post(self.url("genericClass")).json(class);
        self.send(request, &id).await.map(|_| ())
    }

    async fn insert_object(&self, object: &Value) -> Result<Value> {
        let id = resource_id(object)?;
        let request = self.http_client.post(self.url("genericObject")).json(object);
        self.send(request, &id).await
    }

    async fn get_object(&self, object_id: &str) -> Result<Value> {
        let request = self
            .http_client
            .get(self.url(&format!("genericObject/{}", object_id)));
        self.send(request, object_id).await
    }

    async fn patch_object(&self, object_id: &str, patch: &Value) -> Result<Value> {
        let request = self
            .http_client
            .patch(self.url(&format!("genericObject/{}", object_id)))
            .json(patch);
        self.send(request, object_id).await
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// In-process stand-in for the wallet service
#[derive(Default)]
pub struct InMemoryWalletApi {
    classes: RwLock<HashMap<String, Value>>,
    objects: RwLock<HashMap<String, Value>>,
    failure: RwLock<Option<RegistrarError>>,
    calls: AtomicU64,
}

impl InMemoryWalletApi {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty service behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent call fail with `error` until cleared
    pub async fn fail_with(&self, error: Option<RegistrarError>) {
        *self.failure.write().await = error;
    }

    /// Stored class by id
    pub async fn class(&self, class_id: &str) -> Option<Value> {
        self.classes.read().await.get(class_id).cloned()
    }

    /// Number of stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of calls served, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.read().await.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WalletApi for InMemoryWalletApi {
    async fn insert_class(&self, class: &Value) -> Result<()> {
        self.enter().await?;
        let id = resource_id(class)?;
        let mut classes = self.classes.write().await;
        if classes.contains_key(&id) {
            return Err(RegistrarError::AlreadyExists(id));
        }
        classes.insert(id, class.clone());
        Ok(())
    }

    async fn insert_object(&self, object: &Value) -> Result<Value> {
        self.enter().await?;
        let id = resource_id(object)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&id) {
            return Err(RegistrarError::AlreadyExists(id));
        }
        objects.insert(id, object.clone());
        Ok(object.clone())
    }

    async fn get_object(&self, object_id: &str) -> Result<Value> {
        self.enter().await?;
        self.objects
            .read()
            .await
            .get(object_id)
            .cloned()
            .ok_or_else(|| RegistrarError::NotFound(object_id.to_string()))
    }

    async fn patch_object(&self, object_id: &str, patch: &Value) -> Result<Value> {
        self.enter().await?;
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(object_id)
            .ok_or_else(|| RegistrarError::NotFound(object_id.to_string()))?;
        merge(object, patch);
        Ok(object.clone())
    }
}

/// Shallow merge: top-level keys of `patch` replace those of `target`
fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}
