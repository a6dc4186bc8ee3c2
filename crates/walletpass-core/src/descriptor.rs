//! Pass descriptor (`pass.json`) construction
//!
//! The descriptor merges platform-required fields (format version, pass
//! type and team identifiers, serial number) with the definition's content.
//! Each optional definition section maps to one optional descriptor field
//! and is attached by a builder step that does nothing when the section is
//! absent: presence in the definition implies presence in the descriptor,
//! never the reverse.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{PassError, Result};
use crate::types::{Barcode, Location, Nfc, PassDefinition, Rgb, SerialNumber};

/// Descriptor format version accepted by the wallet platform
pub const FORMAT_VERSION: u32 = 1;

/// Identifiers assigned to the issuer by the wallet platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassIdentity {
    /// Pass type identifier (e.g. `pass.com.example.tag`)
    pub pass_type_identifier: String,
    /// Developer team identifier
    pub team_identifier: String,
}

impl PassIdentity {
    /// Create a new identity
    pub fn new(pass_type_identifier: impl Into<String>, team_identifier: impl Into<String>) -> Self {
        Self {
            pass_type_identifier: pass_type_identifier.into(),
            team_identifier: team_identifier.into(),
        }
    }
}

/// How the update web service keys are filled when the definition omits them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WebServicePolicy {
    /// Leave `webServiceURL` and `authenticationToken` out
    #[default]
    Omit,
    /// Point at `{base}/api/passes/apple/{serial}` with a generated token
    DefaultBase(String),
}

/// A labelled field on the pass face or back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassField {
    pub key: String,
    pub label: String,
    pub value: String,
}

impl PassField {
    fn new(key: &str, label: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: value.into(),
        }
    }
}

/// Field layout for the generic pass style
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericFields {
    pub primary_fields: Vec<PassField>,
    pub secondary_fields: Vec<PassField>,
    pub auxiliary_fields: Vec<PassField>,
    pub back_fields: Vec<PassField>,
}

/// The serialized `pass.json` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDescriptor {
    pub format_version: u32,
    pub pass_type_identifier: String,
    pub team_identifier: String,
    pub serial_number: String,
    pub organization_name: String,
    pub description: String,
    pub logo_text: String,
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,

    #[serde(default, rename = "webServiceURL", skip_serializing_if = "Option::is_none")]
    pub web_service_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcodes: Option<Vec<Barcode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfc: Option<Nfc>,

    pub generic: GenericFields,
}

impl PassDescriptor {
    /// Serialize to the exact bytes placed in the bundle
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PassError::InvalidPassDefinition(e.to_string()))
    }
}

/// Builder assembling a [`PassDescriptor`] from a definition
pub struct DescriptorBuilder<'a> {
    definition: &'a PassDefinition,
    serial: &'a SerialNumber,
    identity: &'a PassIdentity,
    web_service: &'a WebServicePolicy,
    generated_at: DateTime<Utc>,
}

impl<'a> DescriptorBuilder<'a> {
    /// Start a descriptor for one serial number
    pub fn new(
        definition: &'a PassDefinition,
        serial: &'a SerialNumber,
        identity: &'a PassIdentity,
    ) -> Self {
        static OMIT: WebServicePolicy = WebServicePolicy::Omit;
        Self {
            definition,
            serial,
            identity,
            web_service: &OMIT,
            generated_at: Utc::now(),
        }
    }

    /// Apply a web-service default policy
    pub fn web_service(mut self, policy: &'a WebServicePolicy) -> Self {
        self.web_service = policy;
        self
    }

    /// Override the generation timestamp shown on the back of the pass
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Build the descriptor
    pub fn build(self) -> Result<PassDescriptor> {
        let def = self.definition;
        def.validate()?;

        if self.identity.pass_type_identifier.is_empty() || self.identity.team_identifier.is_empty() {
            return Err(PassError::InvalidPassDefinition(
                "pass type and team identifiers are required".into(),
            ));
        }

        let mut descriptor = PassDescriptor {
            format_version: FORMAT_VERSION,
            pass_type_identifier: self.identity.pass_type_identifier.clone(),
            team_identifier: self.identity.team_identifier.clone(),
            serial_number: self.serial.to_string(),
            organization_name: def.organization_name.clone(),
            description: def.description.clone(),
            logo_text: def.logo_text.clone(),
            foreground_color: Rgb::parse_field("foregroundColor", &def.foreground_color)?.to_css(),
            background_color: Rgb::parse_field("backgroundColor", &def.background_color)?.to_css(),
            label_color: Rgb::parse_field("labelColor", def.label_color())?.to_css(),
            web_service_url: None,
            authentication_token: None,
            relevant_date: None,
            locations: None,
            max_distance: None,
            barcodes: None,
            nfc: None,
            generic: generic_fields(def, self.serial, self.generated_at),
        };

        attach_relevance(&mut descriptor, def);
        attach_locations(&mut descriptor, def);
        attach_barcode(&mut descriptor, def);
        attach_nfc(&mut descriptor, def);
        attach_web_service(&mut descriptor, def, self.serial, self.web_service);

        Ok(descriptor)
    }
}

fn generic_fields(def: &PassDefinition, serial: &SerialNumber, at: DateTime<Utc>) -> GenericFields {
    GenericFields {
        primary_fields: vec![PassField::new("title", "Wallet Tag", def.logo_text.clone())],
        secondary_fields: vec![PassField::new(
            "organization",
            "Organization",
            def.organization_name.clone(),
        )],
        auxiliary_fields: vec![PassField::new("serial", "Serial Number", serial.to_string())],
        back_fields: vec![
            PassField::new("description", "Description", def.description.clone()),
            PassField::new("generated", "Generated", at.format("%Y-%m-%d %H:%M UTC").to_string()),
        ],
    }
}

fn attach_relevance(descriptor: &mut PassDescriptor, def: &PassDefinition) {
    if let Some(ref date) = def.relevant_date {
        descriptor.relevant_date = Some(date.clone());
    }
}

fn attach_locations(descriptor: &mut PassDescriptor, def: &PassDefinition) {
    if let Some(locations) = def.relevant_locations() {
        descriptor.locations = Some(locations.to_vec());
        // only meaningful alongside locations
        descriptor.max_distance = def.max_distance;
    }
}

fn attach_barcode(descriptor: &mut PassDescriptor, def: &PassDefinition) {
    if let Some(ref barcode) = def.barcode {
        descriptor.barcodes = Some(vec![barcode.clone()]);
    }
}

fn attach_nfc(descriptor: &mut PassDescriptor, def: &PassDefinition) {
    if let Some(ref nfc) = def.nfc {
        descriptor.nfc = Some(nfc.clone());
    }
}

fn attach_web_service(
    descriptor: &mut PassDescriptor,
    def: &PassDefinition,
    serial: &SerialNumber,
    policy: &WebServicePolicy,
) {
    let url = match (&def.web_service_url, policy) {
        (Some(url), _) => url.clone(),
        (None, WebServicePolicy::DefaultBase(base)) => {
            format!("{}/api/passes/apple/{}", base.trim_end_matches('/'), serial)
        }
        (None, WebServicePolicy::Omit) => return,
    };
    let token = def
        .authentication_token
        .clone()
        .unwrap_or_else(generate_authentication_token);

    descriptor.web_service_url = Some(url);
    descriptor.authentication_token = Some(token);
}

/// 32 hex characters; the platform requires at least 16
fn generate_authentication_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BarcodeFormat;
    use chrono::TimeZone;

    fn acme() -> PassDefinition {
        PassDefinition::new("Acme", "VIP", "ACME", "#000000", "#FFFFFF")
    }

    fn identity() -> PassIdentity {
        PassIdentity::new("pass.com.acme.tag", "TEAM123456")
    }

    fn serial() -> SerialNumber {
        SerialNumber::new("WT-1").unwrap()
    }

    #[test]
    fn test_required_fields_merged() {
        let (def, id, serial) = (acme(), identity(), serial());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id).build().unwrap();

        assert_eq!(descriptor.format_version, 1);
        assert_eq!(descriptor.pass_type_identifier, "pass.com.acme.tag");
        assert_eq!(descriptor.team_identifier, "TEAM123456");
        assert_eq!(descriptor.serial_number, "WT-1");
        assert_eq!(descriptor.foreground_color, "rgb(0, 0, 0)");
        assert_eq!(descriptor.background_color, "rgb(255, 255, 255)");
        assert_eq!(descriptor.label_color, "rgb(0, 0, 0)");
        assert_eq!(descriptor.generic.auxiliary_fields[0].value, "WT-1");
    }

    #[test]
    fn test_absent_sections_are_omitted_from_json() {
        let (def, id, serial) = (acme(), identity(), serial());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id).build().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&descriptor.to_bytes().unwrap()).unwrap();

        for key in ["locations", "maxDistance", "barcodes", "nfc", "relevantDate", "webServiceURL", "authenticationToken"] {
            assert!(json.get(key).is_none(), "{} should be absent", key);
        }
    }

    #[test]
    fn test_present_sections_are_attached() {
        let def = acme()
            .with_relevant_date("2026-01-01T10:00:00Z")
            .with_location(Location::new(37.33, -122.03).with_relevant_text("Store nearby"))
            .with_max_distance(100.0)
            .with_barcode(Barcode::new("ABC123", BarcodeFormat::Aztec).with_alt_text("ABC"))
            .with_nfc(Nfc { message: "tap".into(), encryption_public_key: None });
        let (id, serial) = (identity(), serial());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id).build().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&descriptor.to_bytes().unwrap()).unwrap();

        assert_eq!(json["relevantDate"], "2026-01-01T10:00:00Z");
        assert_eq!(json["locations"][0]["relevantText"], "Store nearby");
        assert_eq!(json["maxDistance"], 100.0);
        assert_eq!(json["barcodes"][0]["format"], "PKBarcodeFormatAztec");
        assert_eq!(json["barcodes"][0]["messageEncoding"], "iso-8859-1");
        assert_eq!(json["nfc"]["message"], "tap");
    }

    #[test]
    fn test_max_distance_requires_locations() {
        let def = acme().with_max_distance(50.0);
        let (id, serial) = (identity(), serial());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id).build().unwrap();
        assert!(descriptor.max_distance.is_none());
    }

    #[test]
    fn test_web_service_policy_omit() {
        let (def, id, serial) = (acme(), identity(), serial());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id)
            .web_service(&WebServicePolicy::Omit)
            .build()
            .unwrap();
        assert!(descriptor.web_service_url.is_none());
        assert!(descriptor.authentication_token.is_none());
    }

    #[test]
    fn test_web_service_policy_default_base() {
        let (def, id, serial) = (acme(), identity(), serial());
        let policy = WebServicePolicy::DefaultBase("https://api.acme.test/".into());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id)
            .web_service(&policy)
            .build()
            .unwrap();

        assert_eq!(
            descriptor.web_service_url.as_deref(),
            Some("https://api.acme.test/api/passes/apple/WT-1")
        );
        let token = descriptor.authentication_token.unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_definition_web_service_wins_over_policy() {
        let def = acme().with_web_service("https://hooks.acme.test", "0123456789abcdef0123");
        let (id, serial) = (identity(), serial());
        let policy = WebServicePolicy::DefaultBase("https://api.acme.test".into());
        let descriptor = DescriptorBuilder::new(&def, &serial, &id)
            .web_service(&policy)
            .build()
            .unwrap();

        assert_eq!(descriptor.web_service_url.as_deref(), Some("https://hooks.acme.test"));
        assert_eq!(descriptor.authentication_token.as_deref(), Some("0123456789abcdef0123"));
    }

    #[test]
    fn test_generated_timestamp_is_injectable() {
        let (def, id, serial) = (acme(), identity(), serial());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let descriptor = DescriptorBuilder::new(&def, &serial, &id).generated_at(at).build().unwrap();
        assert_eq!(descriptor.generic.back_fields[1].value, "2026-03-01 09:30 UTC");
    }

    #[test]
    fn test_missing_identity_is_invalid() {
        let (def, serial) = (acme(), serial());
        let id = PassIdentity::new("", "TEAM");
        let err = DescriptorBuilder::new(&def, &serial, &id).build().unwrap_err();
        assert!(matches!(err, PassError::InvalidPassDefinition(_)));
    }
}
