//! Issuer configuration
//!
//! Everything is read from `WALLETPASS_*` environment variables. A platform
//! is enabled by setting its identifying variable (`WALLETPASS_PASS_TYPE_ID`
//! or `WALLETPASS_GOOGLE_ISSUER_ID`); its remaining required variables are
//! then checked.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use walletpass_core::{DigestAlgorithm, ErrorCorrection, QrConfig, MAX_QR_EDGE};

use crate::keys::CertificateNames;
use crate::storage::S3Config;

/// Prefix of every configuration variable
pub const ENV_PREFIX: &str = "WALLETPASS_";

/// Error type for configuration loading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Where artifacts are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Directory(PathBuf),
    S3(S3Config),
}

/// Where signing material is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Files in a local directory
    Directory(PathBuf),
    /// `certificates/` in the artifact store
    ObjectStore,
}

/// Settings for signed binary bundles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppleConfig {
    pub pass_type_identifier: String,
    pub team_identifier: String,
    /// Base URL for the update web-service default
    pub web_service_url: Option<String>,
    pub digest: DigestAlgorithm,
    pub certificate_source: CertificateSource,
    pub certificate_names: CertificateNames,
    pub key_passphrase: Option<String>,
}

/// Settings for registered passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleConfig {
    pub issuer_id: String,
    /// Path of the service-account JSON key
    pub service_account: PathBuf,
    pub api_base: Option<String>,
    /// Class discriminator; derived from the definition branding when unset
    pub class_discriminator: Option<String>,
    pub logo_uri: Option<String>,
    pub details_base_url: Option<String>,
    pub save_link_ttl: Duration,
    pub save_link_origins: Vec<String>,
}

/// Complete issuer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerConfig {
    pub storage: StorageBackend,
    /// Base of returned artifact URLs
    pub public_base_url: Option<String>,
    pub apple: Option<AppleConfig>,
    pub google: Option<GoogleConfig>,
    pub qr: QrConfig,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            public_base_url: None,
            apple: None,
            google: None,
            qr: QrConfig::default(),
        }
    }
}

impl IssuerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    ///
    /// `lookup` receives full variable names including [`ENV_PREFIX`].
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let public_base_url = env.get("PUBLIC_BASE_URL");
        let storage_kind = env.get("STORAGE").map(|v| v.to_lowercase());
        let storage = match storage_kind.as_deref() {
            None | Some("memory") => StorageBackend::Memory,
            Some("directory") | Some("dir") | Some("fs") => {
                StorageBackend::Directory(PathBuf::from(env.require("STORAGE_DIR")?))
            }
            Some("s3") | Some("gcs") => {
                let bucket = env.require("BUCKET")?;
                let mut s3 = if storage_kind.as_deref() == Some("gcs") {
                    S3Config::google_cloud_storage(bucket)
                } else {
                    S3Config::new(bucket)
                };
                if let Some(region) = env.get("S3_REGION") {
                    s3.region = Some(region);
                }
                if let Some(endpoint) = env.get("S3_ENDPOINT") {
                    s3.endpoint = Some(endpoint);
                }
                if let Some(flag) = env.bool("S3_FORCE_PATH_STYLE")? {
                    s3.force_path_style = flag;
                }
                if let Some(flag) = env.bool("S3_PUBLIC_READ")? {
                    s3.public_read = flag;
                }
                s3.prefix = env.get("S3_PREFIX");
                if public_base_url.is_some() {
                    s3.public_base_url = public_base_url.clone();
                }
                StorageBackend::S3(s3)
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: env.full("STORAGE"),
                    reason: format!("unknown backend '{}'", other),
                })
            }
        };

        let apple = match env.get("PASS_TYPE_ID") {
            None => None,
            Some(pass_type_identifier) => {
                let defaults = CertificateNames::default();
                let source_kind = env.get("CERT_SOURCE").map(|v| v.to_lowercase());
                let certificate_source = match source_kind.as_deref() {
                    None | Some("directory") => CertificateSource::Directory(PathBuf::from(
                        env.get("CERT_DIR").unwrap_or_else(|| "certificates".to_string()),
                    )),
                    Some("store") | Some("object-store") => CertificateSource::ObjectStore,
                    Some(other) => {
                        return Err(ConfigError::Invalid {
                            name: env.full("CERT_SOURCE"),
                            reason: format!("unknown source '{}'", other),
                        })
                    }
                };
                Some(AppleConfig {
                    pass_type_identifier,
                    team_identifier: env.require("TEAM_ID")?,
                    web_service_url: env.get("WEB_SERVICE_URL"),
                    digest: env.parse::<DigestAlgorithm>("DIGEST")?.unwrap_or_default(),
                    certificate_source,
                    certificate_names: CertificateNames {
                        intermediate: env.get("WWDR_NAME").unwrap_or(defaults.intermediate),
                        signer_cert: env.get("SIGNER_CERT_NAME").unwrap_or(defaults.signer_cert),
                        signer_key: env.get("SIGNER_KEY_NAME").unwrap_or(defaults.signer_key),
                    },
                    key_passphrase: env.get("SIGNER_KEY_PASSPHRASE"),
                })
            }
        };

        let google = match env.get("GOOGLE_ISSUER_ID") {
            None => None,
            Some(issuer_id) => Some(GoogleConfig {
                issuer_id,
                service_account: PathBuf::from(env.require("GOOGLE_SERVICE_ACCOUNT")?),
                api_base: env.get("GOOGLE_API_BASE"),
                class_discriminator: env.get("GOOGLE_CLASS"),
                logo_uri: env.get("GOOGLE_LOGO_URI"),
                details_base_url: env.get("DETAILS_BASE_URL"),
                save_link_ttl: env
                    .parse::<u64>("SAVE_LINK_TTL")?
                    .map(Duration::from_secs)
                    .unwrap_or(walletpass_registrar::DEFAULT_SAVE_LINK_TTL),
                save_link_origins: env
                    .get("SAVE_LINK_ORIGINS")
                    .map(|v| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
        };

        if apple.is_none() && google.is_none() {
            warn!("No platform configured");
            return Err(ConfigError::Missing(format!(
                "{}PASS_TYPE_ID or {}GOOGLE_ISSUER_ID",
                ENV_PREFIX, ENV_PREFIX
            )));
        }

        let mut qr = QrConfig::default();
        if let Some(size) = env.parse::<u32>("QR_SIZE")? {
            if size == 0 || size > MAX_QR_EDGE {
                return Err(ConfigError::Invalid {
                    name: env.full("QR_SIZE"),
                    reason: format!("must be between 1 and {}", MAX_QR_EDGE),
                });
            }
            qr = qr.with_size(size);
        }
        if let Some(margin) = env.parse::<u32>("QR_MARGIN")? {
            if margin > MAX_QR_EDGE / 4 {
                return Err(ConfigError::Invalid {
                    name: env.full("QR_MARGIN"),
                    reason: format!("must be at most {}", MAX_QR_EDGE / 4),
                });
            }
            qr = qr.with_margin(margin);
        }
        if let Some(level) = env.parse::<ErrorCorrection>("QR_ERROR_CORRECTION")? {
            qr = qr.with_error_correction(level);
        }

        Ok(Self {
            storage,
            public_base_url,
            apple,
            google,
            qr,
        })
    }

    /// Set the storage backend
    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    /// Set the base of returned artifact URLs
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into());
        self
    }

    /// Enable binary bundles
    pub fn with_apple(mut self, apple: AppleConfig) -> Self {
        self.apple = Some(apple);
        self
    }

    /// Enable registered passes
    pub fn with_google(mut self, google: GoogleConfig) -> Self {
        self.google = Some(google);
        self
    }

    /// Set QR rendering parameters
    pub fn with_qr(mut self, qr: QrConfig) -> Self {
        self.qr = qr;
        self
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn full(&self, name: &str) -> String {
        format!("{}{}", ENV_PREFIX, name)
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.full(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::Missing(self.full(name)))
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|v| {
                v.parse::<T>().map_err(|e| ConfigError::Invalid {
                    name: self.full(name),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(name).map(|v| v.to_lowercase()).as_deref() {
            None => Ok(None),
            Some("1") | Some("true") | Some("yes") => Ok(Some(true)),
            Some("0") | Some("false") | Some("no") => Ok(Some(false)),
            Some(other) => Err(ConfigError::Invalid {
                name: self.full(name),
                reason: format!("'{}' is not a boolean", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IssuerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        IssuerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_apple_only_defaults() {
        let config = load(&[("PASS_TYPE_ID", "pass.com.acme.tag"), ("TEAM_ID", "ABCDE12345")]).unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.google.is_none());
        let apple = config.apple.unwrap();
        assert_eq!(apple.digest, DigestAlgorithm::Sha1);
        assert_eq!(apple.certificate_source, CertificateSource::Directory(PathBuf::from("certificates")));
        assert_eq!(apple.certificate_names, CertificateNames::default());
        assert_eq!(config.qr, QrConfig::default());
    }

    #[test]
    fn test_no_platform_is_missing() {
        let err = load(&[("STORAGE", "memory")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_platform_requirements() {
        assert_eq!(
            load(&[("PASS_TYPE_ID", "pass.com.acme.tag")]).unwrap_err(),
            ConfigError::Missing("WALLETPASS_TEAM_ID".into())
        );
        assert_eq!(
            load(&[("GOOGLE_ISSUER_ID", "3388000000022")]).unwrap_err(),
            ConfigError::Missing("WALLETPASS_GOOGLE_SERVICE_ACCOUNT".into())
        );
    }

    #[test]
    fn test_google_settings() {
        let config = load(&[
            ("GOOGLE_ISSUER_ID", "3388000000022"),
            ("GOOGLE_SERVICE_ACCOUNT", "/etc/walletpass/sa.json"),
            ("SAVE_LINK_TTL", "600"),
            ("SAVE_LINK_ORIGINS", "https://acme.test, https://shop.acme.test,"),
        ])
        .unwrap();

        let google = config.google.unwrap();
        assert_eq!(google.save_link_ttl, Duration::from_secs(600));
        assert_eq!(google.save_link_origins, vec!["https://acme.test", "https://shop.acme.test"]);
        assert_eq!(google.class_discriminator, None);
    }

    #[test]
    fn test_s3_storage() {
        let config = load(&[
            ("GOOGLE_ISSUER_ID", "3388000000022"),
            ("GOOGLE_SERVICE_ACCOUNT", "sa.json"),
            ("STORAGE", "S3"),
            ("BUCKET", "passes"),
            ("S3_ENDPOINT", "http://localhost:9000"),
            ("S3_FORCE_PATH_STYLE", "true"),
            ("PUBLIC_BASE_URL", "https://cdn.acme.test"),
        ])
        .unwrap();

        let StorageBackend::S3(s3) = config.storage else {
            panic!("expected s3 storage");
        };
        assert_eq!(s3.bucket, "passes");
        assert!(s3.force_path_style);
        assert!(!s3.public_read);
        assert_eq!(s3.public_base_url.as_deref(), Some("https://cdn.acme.test"));
    }

    #[test]
    fn test_gcs_interop_defaults() {
        let config = load(&[
            ("GOOGLE_ISSUER_ID", "3388000000022"),
            ("GOOGLE_SERVICE_ACCOUNT", "sa.json"),
            ("STORAGE", "gcs"),
            ("BUCKET", "acme-passes"),
        ])
        .unwrap();
        assert_eq!(config.storage, StorageBackend::S3(S3Config::google_cloud_storage("acme-passes")));
    }

    #[test]
    fn test_invalid_values() {
        let base = [("PASS_TYPE_ID", "pass.com.acme.tag"), ("TEAM_ID", "ABCDE12345")];

        let mut vars = base.to_vec();
        vars.push(("DIGEST", "md5"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { ref name, .. }) if name == "WALLETPASS_DIGEST"));

        let mut vars = base.to_vec();
        vars.push(("QR_SIZE", "big"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { ref name, .. }) if name == "WALLETPASS_QR_SIZE"));

        let mut vars = base.to_vec();
        vars.push(("QR_SIZE", "4294967295"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { ref name, .. }) if name == "WALLETPASS_QR_SIZE"));

        let mut vars = base.to_vec();
        vars.push(("QR_SIZE", "0"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { ref name, .. }) if name == "WALLETPASS_QR_SIZE"));

        let mut vars = base.to_vec();
        vars.push(("QR_MARGIN", "100000"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { ref name, .. }) if name == "WALLETPASS_QR_MARGIN"));

        let mut vars = base.to_vec();
        vars.push(("STORAGE", "ftp"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_directory_storage_and_overrides() {
        let config = load(&[
            ("PASS_TYPE_ID", "pass.com.acme.tag"),
            ("TEAM_ID", "ABCDE12345"),
            ("STORAGE", "directory"),
            ("STORAGE_DIR", "/srv/passes"),
            ("CERT_SOURCE", "store"),
            ("DIGEST", "sha256"),
            ("QR_SIZE", "512"),
            ("QR_MARGIN", "1"),
            ("SIGNER_KEY_PASSPHRASE", "  "),
        ])
        .unwrap();

        assert_eq!(config.storage, StorageBackend::Directory(PathBuf::from("/srv/passes")));
        assert_eq!(config.public_base_url, None);
        let apple = config.apple.unwrap();
        assert_eq!(apple.certificate_source, CertificateSource::ObjectStore);
        assert_eq!(apple.digest, DigestAlgorithm::Sha256);
        assert_eq!(apple.key_passphrase, None);
        assert_eq!(config.qr.size, 512);
        assert_eq!(config.qr.margin, 1);
    }
}
