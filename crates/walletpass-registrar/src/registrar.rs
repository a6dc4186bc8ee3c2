//! Class and object registration
//!
//! Classes carry shared branding and are idempotent: registering an existing
//! class succeeds with the same id. Objects represent one issued pass and are
//! created exactly once per serial number; a second creation is reported as
//! [`RegistrarError::DuplicateObject`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walletpass_core::{PassDefinition, Rgb, SerialNumber};

use crate::api::WalletApi;
use crate::error::{RegistrarError, Result};

/// Prefix of generated class discriminators
pub const CLASS_DISCRIMINATOR_PREFIX: &str = "wallet_tag_class_";

const LANGUAGE: &str = "en-US";

/// Progress of one registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// Nothing registered yet
    NoClass,
    /// The class exists remotely
    ClassEnsured { class_id: String },
    /// The object exists remotely
    ObjectCreated { class_id: String, object_id: String },
    /// A save link was issued for the object
    Done { object_id: String, save_url: String },
    /// A step failed; `object_id` is set when the object already exists
    Failed {
        kind: &'static str,
        object_id: Option<String>,
    },
}

impl RegistrationState {
    /// Record a successful class registration
    pub fn class_ensured(self, class_id: impl Into<String>) -> Self {
        match self {
            RegistrationState::NoClass => RegistrationState::ClassEnsured {
                class_id: class_id.into(),
            },
            other => other.invalid("class_ensured"),
        }
    }

    /// Record a successful object creation
    pub fn object_created(self, object_id: impl Into<String>) -> Self {
        match self {
            RegistrationState::ClassEnsured { class_id } => RegistrationState::ObjectCreated {
                class_id,
                object_id: object_id.into(),
            },
            other => other.invalid("object_created"),
        }
    }

    /// Record the issued save link
    pub fn done(self, save_url: impl Into<String>) -> Self {
        match self {
            RegistrationState::ObjectCreated { object_id, .. } => RegistrationState::Done {
                object_id,
                save_url: save_url.into(),
            },
            other => other.invalid("done"),
        }
    }

    /// Record a failure, keeping the object id if one exists
    pub fn failed(self, kind: &'static str) -> Self {
        let object_id = self.object_id().map(String::from);
        RegistrationState::Failed { kind, object_id }
    }

    /// Remote object id, once created
    pub fn object_id(&self) -> Option<&str> {
        match self {
            RegistrationState::ObjectCreated { object_id, .. }
            | RegistrationState::Done { object_id, .. } => Some(object_id),
            RegistrationState::Failed { object_id, .. } => object_id.as_deref(),
            _ => None,
        }
    }

    /// Check if the registration finished
    pub fn is_done(&self) -> bool {
        matches!(self, RegistrationState::Done { .. })
    }

    fn invalid(self, transition: &str) -> Self {
        warn!(state = ?self, transition = %transition, "Invalid registration transition");
        self.failed("invalid_transition")
    }
}

/// Registers classes and objects for one issuer
pub struct WalletRegistrar {
    api: Arc<dyn WalletApi>,
    issuer_id: String,
    details_base_url: Option<String>,
    logo_uri: Option<String>,
    hero_image_uri: Option<String>,
}

impl WalletRegistrar {
    /// Create a registrar for `issuer_id`
    pub fn new(api: Arc<dyn WalletApi>, issuer_id: impl Into<String>) -> Self {
        Self {
            api,
            issuer_id: issuer_id.into(),
            details_base_url: None,
            logo_uri: None,
            hero_image_uri: None,
        }
    }

    /// Link objects to `{base}/api/passes/{serial}/google`
    pub fn with_details_base_url(mut self, base: impl Into<String>) -> Self {
        self.details_base_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    /// Logo shown on every class
    pub fn with_logo_uri(mut self, uri: impl Into<String>) -> Self {
        self.logo_uri = Some(uri.into());
        self
    }

    /// Hero image shown on every object
    pub fn with_hero_image_uri(mut self, uri: impl Into<String>) -> Self {
        self.hero_image_uri = Some(uri.into());
        self
    }

    /// Issuer this registrar acts for
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Class id for a discriminator
    pub fn class_id(&self, discriminator: &str) -> String {
        format!("{}.{}", self.issuer_id, discriminator)
    }

    /// Object id for a serial number
    pub fn object_id(&self, serial: &SerialNumber) -> String {
        format!("{}.{}", self.issuer_id, serial)
    }

    /// Register a class, treating an existing class as success
    pub async fn ensure_class(&self, definition: &PassDefinition, discriminator: &str) -> Result<String> {
        if discriminator.is_empty() {
            return Err(RegistrarError::InvalidInput("class discriminator is empty".into()));
        }
        let class_id = self.class_id(discriminator);
        let body = self.class_body(definition, &class_id)?;

        match self.api.insert_class(&body).await {
            Ok(()) => {
                info!(class_id = %class_id, "Registered wallet class");
                Ok(class_id)
            }
            Err(RegistrarError::AlreadyExists(_)) => {
                debug!(class_id = %class_id, "Wallet class already registered");
                Ok(class_id)
            }
            Err(e) => {
                warn!(class_id = %class_id, error = %e, "Class registration failed");
                Err(e)
            }
        }
    }

    /// Create the object for a serial number exactly once
    pub async fn create_object(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        class_id: &str,
    ) -> Result<String> {
        let object_id = self.object_id(serial);
        let body = self.object_body(definition, serial, &object_id, class_id);

        match self.api.insert_object(&body).await {
            Ok(created) => {
                let id = created
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(object_id.as_str())
                    .to_string();
                info!(object_id = %id, class_id = %class_id, "Created wallet object");
                Ok(id)
            }
            Err(RegistrarError::AlreadyExists(_)) => {
                warn!(object_id = %object_id, "Wallet object already exists for serial");
                Err(RegistrarError::DuplicateObject(object_id))
            }
            Err(e) => {
                warn!(object_id = %object_id, error = %e, "Object creation failed");
                Err(e)
            }
        }
    }

    /// Fetch an object
    pub async fn get_object(&self, object_id: &str) -> Result<Value> {
        self.api.get_object(object_id).await
    }

    /// Patch an object
    pub async fn update_object(&self, object_id: &str, patch: &Value) -> Result<Value> {
        let updated = self.api.patch_object(object_id, patch).await?;
        info!(object_id = %object_id, "Updated wallet object");
        Ok(updated)
    }

    fn class_body(&self, definition: &PassDefinition, class_id: &str) -> Result<Value> {
        let background = Rgb::parse(&definition.background_color).ok_or_else(|| {
            RegistrarError::InvalidInput(format!(
                "backgroundColor must be a #RRGGBB color, got '{}'",
                definition.background_color
            ))
        })?;

        let mut class = json!({
            "id": class_id,
            "issuerName": definition.organization_name,
            "reviewStatus": "UNDER_REVIEW",
            "hexBackgroundColor": background.to_hex(),
            "textModulesData": [{
                "id": "description",
                "header": "Description",
                "body": definition.description,
            }],
        });
        if let Some(fields) = class.as_object_mut() {
            fields.insert("displayName".into(), localized(&definition.logo_text));
            if let Some(ref uri) = self.logo_uri {
                fields.insert("logo".into(), image(uri, "Logo"));
            }
            if let Some(locations) = definition.relevant_locations() {
                let points: Vec<Value> = locations
                    .iter()
                    .map(|l| {
                        json!({
                            "kind": "walletobjects#latLongPoint",
                            "latitude": l.latitude,
                            "longitude": l.longitude,
                        })
                    })
                    .collect();
                fields.insert("locations".into(), Value::Array(points));
            }
        }
        Ok(class)
    }

    fn object_body(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        object_id: &str,
        class_id: &str,
    ) -> Value {
        let mut object = json!({
            "id": object_id,
            "classId": class_id,
            "state": "ACTIVE",
            "cardTitle": localized(&definition.organization_name),
            "header": localized(&definition.logo_text),
            "textModulesData": [
                { "id": "serial", "header": "Serial Number", "body": serial.as_str() },
                {
                    "id": "generated",
                    "header": "Generated",
                    "body": Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
                },
            ],
        });

        if let Some(fields) = object.as_object_mut() {
            if let Some(background) = Rgb::parse(&definition.background_color) {
                fields.insert("hexBackgroundColor".into(), json!(background.to_hex()));
            }
            if let Some(ref uri) = self.hero_image_uri {
                fields.insert("heroImage".into(), image(uri, "Hero image"));
            }
            if let Some(ref base) = self.details_base_url {
                fields.insert(
                    "linksModuleData".into(),
                    json!({
                        "uris": [{
                            "id": "pass_details",
                            "uri": format!("{}/api/passes/{}/google", base, serial),
                            "description": "View Pass Details",
                        }]
                    }),
                );
            }
            if let Some(ref barcode) = definition.barcode {
                fields.insert(
                    "barcode".into(),
                    json!({
                        "type": barcode.format.as_wallet_objects(),
                        "value": barcode.message,
                        "alternateText": barcode.alt_text.as_deref().unwrap_or(barcode.message.as_str()),
                    }),
                );
            }
        }
        object
    }
}

fn localized(value: &str) -> Value {
    json!({ "defaultValue": { "language": LANGUAGE, "value": value } })
}

fn image(uri: &str, description: &str) -> Value {
    json!({
        "sourceUri": { "uri": uri },
        "contentDescription": localized(description),
    })
}

/// Deterministic discriminator derived from a definition's branding
///
/// Definitions with identical branding share a class.
pub fn default_discriminator(definition: &PassDefinition) -> String {
    let mut hasher = Sha256::new();
    for part in [
        &definition.organization_name,
        &definition.logo_text,
        &definition.background_color.to_uppercase(),
        &definition.description,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", CLASS_DISCRIMINATOR_PREFIX, &digest[..16])
}
