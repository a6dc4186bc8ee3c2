//! Platform-agnostic pass data model

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PassError, Result};

/// Platform-agnostic description of a pass's content
///
/// Field names match the JSON produced by the template collaborator.
/// Syntax (coordinate ranges, enumerations) is assumed to have been checked
/// upstream; only the fields the generator cannot work without are checked
/// by [`PassDefinition::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDefinition {
    /// Issuing organization
    pub organization_name: String,

    /// Free-text description shown on the back of the pass
    pub description: String,

    /// Short text shown next to the logo
    pub logo_text: String,

    /// Foreground color (`#RRGGBB`)
    pub foreground_color: String,

    /// Background color (`#RRGGBB`)
    pub background_color: String,

    /// Label color (`#RRGGBB`); the foreground color is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_color: Option<String>,

    /// Update web service endpoint override
    #[serde(default, rename = "webServiceURL", skip_serializing_if = "Option::is_none")]
    pub web_service_url: Option<String>,

    /// Update web service token override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,

    /// ISO-8601 timestamp at which the pass becomes relevant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_date: Option<String>,

    /// Locations at which the pass becomes relevant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,

    /// Maximum distance in meters from a location to trigger relevance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,

    /// Barcode rendered on the pass face
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<Barcode>,

    /// Near-field payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfc: Option<Nfc>,
}

impl PassDefinition {
    /// Create a definition with only the required fields set
    pub fn new(
        organization_name: impl Into<String>,
        description: impl Into<String>,
        logo_text: impl Into<String>,
        foreground_color: impl Into<String>,
        background_color: impl Into<String>,
    ) -> Self {
        Self {
            organization_name: organization_name.into(),
            description: description.into(),
            logo_text: logo_text.into(),
            foreground_color: foreground_color.into(),
            background_color: background_color.into(),
            label_color: None,
            web_service_url: None,
            authentication_token: None,
            relevant_date: None,
            locations: None,
            max_distance: None,
            barcode: None,
            nfc: None,
        }
    }

    /// Parse a definition from JSON
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| PassError::InvalidPassDefinition(e.to_string()))
    }

    /// Set the label color
    pub fn with_label_color(mut self, color: impl Into<String>) -> Self {
        self.label_color = Some(color.into());
        self
    }

    /// Set the relevant date
    pub fn with_relevant_date(mut self, date: impl Into<String>) -> Self {
        self.relevant_date = Some(date.into());
        self
    }

    /// Add a relevance location
    pub fn with_location(mut self, location: Location) -> Self {
        self.locations.get_or_insert_with(Vec::new).push(location);
        self
    }

    /// Set the maximum relevance distance
    pub fn with_max_distance(mut self, meters: f64) -> Self {
        self.max_distance = Some(meters);
        self
    }

    /// Set the barcode
    pub fn with_barcode(mut self, barcode: Barcode) -> Self {
        self.barcode = Some(barcode);
        self
    }

    /// Set the NFC payload
    pub fn with_nfc(mut self, nfc: Nfc) -> Self {
        self.nfc = Some(nfc);
        self
    }

    /// Set the update web service endpoint and token
    pub fn with_web_service(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.web_service_url = Some(url.into());
        self.authentication_token = Some(token.into());
        self
    }

    /// Locations, treating an empty list as absent
    pub fn relevant_locations(&self) -> Option<&[Location]> {
        self.locations.as_deref().filter(|l| !l.is_empty())
    }

    /// Effective label color
    pub fn label_color(&self) -> &str {
        self.label_color.as_deref().unwrap_or(&self.foreground_color)
    }

    /// Check the fields generation depends on
    pub fn validate(&self) -> Result<()> {
        require_text("organizationName", &self.organization_name)?;
        require_text("description", &self.description)?;
        require_text("logoText", &self.logo_text)?;
        Rgb::parse_field("foregroundColor", &self.foreground_color)?;
        Rgb::parse_field("backgroundColor", &self.background_color)?;
        if let Some(ref label) = self.label_color {
            Rgb::parse_field("labelColor", label)?;
        }
        if let Some(ref barcode) = self.barcode {
            require_text("barcode.message", &barcode.message)?;
        }
        if let Some(ref nfc) = self.nfc {
            require_text("nfc.message", &nfc.message)?;
        }
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PassError::InvalidPassDefinition(format!("{} is required", field)));
    }
    Ok(())
}

/// A relevance location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Text shown when the pass becomes relevant here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_text: Option<String>,
}

impl Location {
    /// Create a location from coordinates
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            relevant_text: None,
        }
    }

    /// Set the relevant text
    pub fn with_relevant_text(mut self, text: impl Into<String>) -> Self {
        self.relevant_text = Some(text.into());
        self
    }
}

/// Barcode symbologies supported by both wallet platforms
///
/// Unknown names deserialize to [`BarcodeFormat::Qr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BarcodeFormat {
    /// QR code
    #[default]
    Qr,
    /// PDF417
    Pdf417,
    /// Aztec
    Aztec,
    /// Code 128
    Code128,
}

impl BarcodeFormat {
    /// Name used in pass descriptors
    pub fn as_passkit(&self) -> &'static str {
        match self {
            BarcodeFormat::Qr => "PKBarcodeFormatQR",
            BarcodeFormat::Pdf417 => "PKBarcodeFormatPDF417",
            BarcodeFormat::Aztec => "PKBarcodeFormatAztec",
            BarcodeFormat::Code128 => "PKBarcodeFormatCode128",
        }
    }

    /// Name used by the wallet objects API
    pub fn as_wallet_objects(&self) -> &'static str {
        match self {
            BarcodeFormat::Qr => "QR_CODE",
            BarcodeFormat::Pdf417 => "PDF_417",
            BarcodeFormat::Aztec => "AZTEC",
            BarcodeFormat::Code128 => "CODE_128",
        }
    }

    /// Look up a format by its descriptor name
    pub fn from_passkit(name: &str) -> Option<Self> {
        match name {
            "PKBarcodeFormatQR" => Some(BarcodeFormat::Qr),
            "PKBarcodeFormatPDF417" => Some(BarcodeFormat::Pdf417),
            "PKBarcodeFormatAztec" => Some(BarcodeFormat::Aztec),
            "PKBarcodeFormatCode128" => Some(BarcodeFormat::Code128),
            _ => None,
        }
    }
}

impl From<String> for BarcodeFormat {
    fn from(name: String) -> Self {
        BarcodeFormat::from_passkit(&name).unwrap_or_else(|| {
            warn!(format = %name, "Unknown barcode format, substituting QR");
            BarcodeFormat::default()
        })
    }
}

impl From<BarcodeFormat> for String {
    fn from(format: BarcodeFormat) -> Self {
        format.as_passkit().to_string()
    }
}

/// Barcode descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    /// Encoded message
    pub message: String,
    /// Symbology
    pub format: BarcodeFormat,
    /// Text encoding of the message
    #[serde(default = "default_message_encoding")]
    pub message_encoding: String,
    /// Human-readable text shown under the barcode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

fn default_message_encoding() -> String {
    "iso-8859-1".to_string()
}

impl Barcode {
    /// Create a barcode with the default message encoding
    pub fn new(message: impl Into<String>, format: BarcodeFormat) -> Self {
        Self {
            message: message.into(),
            format,
            message_encoding: default_message_encoding(),
            alt_text: None,
        }
    }

    /// Set the alt text
    pub fn with_alt_text(mut self, alt_text: impl Into<String>) -> Self {
        self.alt_text = Some(alt_text.into());
        self
    }
}

/// Near-field payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nfc {
    /// Payload transmitted to the terminal
    pub message: String,
    /// Base64 public key used to encrypt the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_public_key: Option<String>,
}

/// An RGB color parsed from `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse `#RRGGBB` (the `#` is optional)
    pub fn parse(value: &str) -> Option<Self> {
        let hex = value.trim().strip_prefix('#').unwrap_or(value.trim());
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    /// Parse a named definition field
    pub fn parse_field(field: &str, value: &str) -> Result<Self> {
        Self::parse(value).ok_or_else(|| {
            PassError::InvalidPassDefinition(format!(
                "{} must be a #RRGGBB color, got '{}'",
                field, value
            ))
        })
    }

    /// CSS `rgb(r, g, b)` form used in pass descriptors
    pub fn to_css(self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }

    /// Upper-case `#RRGGBB` form
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Caller-supplied identifier of one generated pass
///
/// Used as a storage key segment and as a remote object id suffix, so it is
/// restricted to `[A-Za-z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Validate and wrap a serial number
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(PassError::InvalidPassDefinition("serial number is empty".into()));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(PassError::InvalidPassDefinition(format!(
                "serial number '{}' contains unsupported character '{}'",
                value, c
            )));
        }
        Ok(Self(value))
    }

    /// Borrow the serial as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = PassError;

    fn try_from(value: String) -> Result<Self> {
        SerialNumber::new(value)
    }
}

impl From<SerialNumber> for String {
    fn from(serial: SerialNumber) -> Self {
        serial.0
    }
}

/// Target wallet platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Signed binary bundle
    Apple,
    /// Remotely registered object with a signed save link
    Google,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Apple => write!(f, "apple"),
            Platform::Google => write!(f, "google"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "apple" | "binary" | "pkpass" => Ok(Platform::Apple),
            "google" | "registered" => Ok(Platform::Google),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// URLs referencing a generated pass
///
/// For [`Platform::Google`] the artifact URL is a time-bounded save link,
/// not a permanent storage URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    /// Bundle download URL or save link
    pub artifact_url: String,
    /// Public URL of the QR image encoding `artifact_url`
    pub qr_code_url: String,
}
