//! Pass Orchestrator
//!
//! Drives one generation request through the steps of its platform path and
//! returns the artifact URL together with the URL of a QR image encoding it.
//!
//! ## Binary path
//!
//! 1. Load signing material (cached across requests)
//! 2. Build and sign the bundle
//! 3. Publish the bundle
//! 4. Encode and publish the QR image of the bundle URL
//!
//! ## Registered path
//!
//! 1. Ensure the branding class exists
//! 2. Create the object for the serial (exactly once)
//! 3. Sign a save link for the object
//! 4. Encode and publish the QR image of the save link
//!
//! A failure names the step it happened in and carries the underlying
//! [`PassError`] unchanged. When the artifact already exists at that point
//! its URL is reported too, so only the QR steps need to be retried (see
//! [`PassOrchestrator::regenerate_qr`]).

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walletpass_core::{
    BundleBuilder, GeneratedArtifact, PassDefinition, PassError, PassIdentity, Platform, QrConfig,
    QrEncoder, SerialNumber, WebServicePolicy, BUNDLE_CONTENT_TYPE,
};
use walletpass_registrar::{
    default_discriminator, RegistrationState, RestWalletApi, SaveLinkSigner, ServiceAccountKey,
    WalletRegistrar,
};

use crate::config::{CertificateSource, ConfigError, IssuerConfig, StorageBackend};
use crate::keys::{CertificateProvider, DirectorySource, MaterialSource, ObjectStoreSource};
use crate::storage::{
    bundle_key, qr_key, ArtifactPublisher, ArtifactStore, DirectoryStore, MemoryStore, S3Store,
    QR_CONTENT_TYPE,
};

/// A step of a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Validate,
    LoadCertificates,
    BuildBundle,
    PublishBundle,
    EnsureClass,
    CreateObject,
    SignSaveLink,
    EncodeQr,
    PublishQr,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Validate => "validate",
            Step::LoadCertificates => "load_certificates",
            Step::BuildBundle => "build_bundle",
            Step::PublishBundle => "publish_bundle",
            Step::EnsureClass => "ensure_class",
            Step::CreateObject => "create_object",
            Step::SignSaveLink => "sign_save_link",
            Step::EncodeQr => "encode_qr",
            Step::PublishQr => "publish_qr",
        };
        f.write_str(name)
    }
}

/// Error type for generation requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// A step failed
    #[error("Step {step} failed: {source}")]
    Failed {
        step: Step,
        source: PassError,
        /// Bundle URL, save link or object id, when it already exists
        published_artifact: Option<String>,
    },

    /// The request was cancelled before `step` started
    #[error("Cancelled before step {step}")]
    Cancelled {
        step: Step,
        published_artifact: Option<String>,
    },
}

impl GenerateError {
    /// Step that failed or was about to start
    pub fn step(&self) -> Step {
        match self {
            GenerateError::Failed { step, .. } | GenerateError::Cancelled { step, .. } => *step,
        }
    }

    /// Underlying error, unless the request was cancelled
    pub fn pass_error(&self) -> Option<&PassError> {
        match self {
            GenerateError::Failed { source, .. } => Some(source),
            GenerateError::Cancelled { .. } => None,
        }
    }

    /// Artifact that already exists despite the failure
    pub fn published_artifact(&self) -> Option<&str> {
        match self {
            GenerateError::Failed { published_artifact, .. }
            | GenerateError::Cancelled { published_artifact, .. } => published_artifact.as_deref(),
        }
    }
}

/// Tracks how far a request got
struct Progress<'a> {
    cancel: &'a CancellationToken,
    published: Option<String>,
}

impl<'a> Progress<'a> {
    fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            published: None,
        }
    }

    fn begin(&self, step: Step) -> Result<(), GenerateError> {
        if self.cancel.is_cancelled() {
            return Err(GenerateError::Cancelled {
                step,
                published_artifact: self.published.clone(),
            });
        }
        debug!(step = %step, "Starting step");
        Ok(())
    }

    fn fail(&self, step: Step, source: PassError) -> GenerateError {
        GenerateError::Failed {
            step,
            source,
            published_artifact: self.published.clone(),
        }
    }
}

struct BinaryPath {
    provider: Arc<CertificateProvider>,
    builder: BundleBuilder,
}

struct RegisteredPath {
    registrar: WalletRegistrar,
    signer: SaveLinkSigner,
    discriminator: Option<String>,
}

/// Runs generation requests for the configured platforms
pub struct PassOrchestrator {
    publisher: ArtifactPublisher,
    qr: QrEncoder,
    binary: Option<BinaryPath>,
    registered: Option<RegisteredPath>,
}

impl PassOrchestrator {
    /// Create an orchestrator publishing to `store` with no platform enabled
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            publisher: ArtifactPublisher::new(store),
            qr: QrEncoder::default(),
            binary: None,
            registered: None,
        }
    }

    /// Set QR rendering parameters
    pub fn with_qr(mut self, config: QrConfig) -> Self {
        self.qr = QrEncoder::new(config);
        self
    }

    /// Enable the binary path
    pub fn with_apple(mut self, provider: Arc<CertificateProvider>, builder: BundleBuilder) -> Self {
        self.binary = Some(BinaryPath { provider, builder });
        self
    }

    /// Enable the registered path
    pub fn with_google(mut self, registrar: WalletRegistrar, signer: SaveLinkSigner) -> Self {
        self.registered = Some(RegisteredPath {
            registrar,
            signer,
            discriminator: None,
        });
        self
    }

    /// Use a fixed class discriminator instead of one derived from branding
    ///
    /// Has no effect unless the registered path is enabled.
    pub fn with_class_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        if let Some(ref mut registered) = self.registered {
            registered.discriminator = Some(discriminator.into());
        }
        self
    }

    /// Build an orchestrator from configuration
    pub async fn from_config(config: &IssuerConfig) -> Result<Self, ConfigError> {
        let store: Arc<dyn ArtifactStore> = match &config.storage {
            StorageBackend::Memory => match &config.public_base_url {
                Some(base) => Arc::new(MemoryStore::new().with_base_url(base.clone())),
                None => Arc::new(MemoryStore::new()),
            },
            StorageBackend::Directory(root) => match &config.public_base_url {
                Some(base) => Arc::new(DirectoryStore::new(root).with_public_base_url(base.clone())),
                None => Arc::new(DirectoryStore::new(root)),
            },
            StorageBackend::S3(s3) => Arc::new(S3Store::connect(s3).await.map_err(|e| {
                ConfigError::Invalid {
                    name: "storage".into(),
                    reason: e.to_string(),
                }
            })?),
        };

        let mut orchestrator = Self::new(store.clone()).with_qr(config.qr);

        if let Some(apple) = &config.apple {
            let source: Arc<dyn MaterialSource> = match &apple.certificate_source {
                CertificateSource::Directory(root) => Arc::new(DirectorySource::new(root)),
                CertificateSource::ObjectStore => Arc::new(ObjectStoreSource::new(store.clone())),
            };
            let mut provider =
                CertificateProvider::new(source).with_names(apple.certificate_names.clone());
            if let Some(passphrase) = &apple.key_passphrase {
                provider = provider.with_passphrase(passphrase.clone());
            }
            let web_service = match &apple.web_service_url {
                Some(base) => WebServicePolicy::DefaultBase(base.clone()),
                None => WebServicePolicy::Omit,
            };
            let builder = BundleBuilder::new(PassIdentity::new(
                apple.pass_type_identifier.clone(),
                apple.team_identifier.clone(),
            ))
            .with_web_service(web_service)
            .with_digest_algorithm(apple.digest);
            orchestrator = orchestrator.with_apple(Arc::new(provider), builder);
        }

        if let Some(google) = &config.google {
            let setup = |reason: String| ConfigError::Invalid {
                name: "google service account".into(),
                reason,
            };
            let key = ServiceAccountKey::from_file(&google.service_account)
                .await
                .map_err(|e| setup(e.to_string()))?;
            let mut api = RestWalletApi::new(key.clone()).map_err(|e| setup(e.to_string()))?;
            if let Some(base) = &google.api_base {
                api = api.with_base_url(base.clone());
            }
            let mut registrar = WalletRegistrar::new(Arc::new(api), google.issuer_id.clone());
            if let Some(base) = &google.details_base_url {
                registrar = registrar.with_details_base_url(base.clone());
            }
            if let Some(uri) = &google.logo_uri {
                registrar = registrar.with_logo_uri(uri.clone());
            }
            let signer = SaveLinkSigner::from_service_account(&key)
                .map_err(|e| setup(e.to_string()))?
                .with_ttl(google.save_link_ttl)
                .with_origins(google.save_link_origins.clone());

            orchestrator = orchestrator.with_google(registrar, signer);
            if let Some(discriminator) = &google.class_discriminator {
                orchestrator = orchestrator.with_class_discriminator(discriminator.clone());
            }
        }

        info!(
            apple = orchestrator.binary.is_some(),
            google = orchestrator.registered.is_some(),
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Store artifacts are published to
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        self.publisher.store()
    }

    /// Generate a pass for `platform`
    pub async fn generate(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        platform: Platform,
    ) -> Result<GeneratedArtifact, GenerateError> {
        self.generate_with_cancel(definition, serial, platform, &CancellationToken::new())
            .await
    }

    /// Generate a pass, stopping between steps once `cancel` fires
    pub async fn generate_with_cancel(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        platform: Platform,
        cancel: &CancellationToken,
    ) -> Result<GeneratedArtifact, GenerateError> {
        let mut progress = Progress::new(cancel);
        let result = match platform {
            Platform::Apple => self.generate_binary(definition, serial, &mut progress).await,
            Platform::Google => self.generate_registered(definition, serial, &mut progress).await,
        };

        match &result {
            Ok(artifact) => info!(
                serial = %serial,
                platform = %platform,
                artifact_url = %artifact.artifact_url,
                qr_code_url = %artifact.qr_code_url,
                "Generated pass"
            ),
            Err(e) => warn!(
                serial = %serial,
                platform = %platform,
                step = %e.step(),
                kind = e.pass_error().map(PassError::kind).unwrap_or("cancelled"),
                published_artifact = ?e.published_artifact(),
                "Pass generation failed"
            ),
        }
        result
    }

    /// Re-render and republish the QR image for an existing artifact
    pub async fn regenerate_qr(
        &self,
        artifact_url: &str,
        serial: &SerialNumber,
        platform: Platform,
    ) -> Result<GeneratedArtifact, GenerateError> {
        let cancel = CancellationToken::new();
        let mut progress = Progress::new(&cancel);
        progress.published = Some(artifact_url.to_string());
        self.publish_qr(artifact_url, serial, platform, &progress).await
    }

    async fn generate_binary(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        progress: &mut Progress<'_>,
    ) -> Result<GeneratedArtifact, GenerateError> {
        progress.begin(Step::Validate)?;
        let Some(binary) = &self.binary else {
            return Err(progress.fail(Step::Validate, not_enabled(Platform::Apple)));
        };
        definition.validate().map_err(|e| progress.fail(Step::Validate, e))?;

        progress.begin(Step::LoadCertificates)?;
        let material = binary
            .provider
            .signing_material()
            .await
            .map_err(|e| progress.fail(Step::LoadCertificates, e))?;

        progress.begin(Step::BuildBundle)?;
        let bundle = binary
            .builder
            .build(definition, serial, &material)
            .map_err(|e| progress.fail(Step::BuildBundle, e))?;

        progress.begin(Step::PublishBundle)?;
        let bundle_url = self
            .publisher
            .publish(bundle.bytes, &bundle_key(serial), BUNDLE_CONTENT_TYPE)
            .await
            .map_err(|e| progress.fail(Step::PublishBundle, e))?;
        progress.published = Some(bundle_url.clone());

        self.publish_qr(&bundle_url, serial, Platform::Apple, progress).await
    }

    async fn generate_registered(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        progress: &mut Progress<'_>,
    ) -> Result<GeneratedArtifact, GenerateError> {
        progress.begin(Step::Validate)?;
        let Some(registered) = &self.registered else {
            return Err(progress.fail(Step::Validate, not_enabled(Platform::Google)));
        };
        definition.validate().map_err(|e| progress.fail(Step::Validate, e))?;

        let mut state = RegistrationState::NoClass;

        progress.begin(Step::EnsureClass)?;
        let discriminator = registered
            .discriminator
            .clone()
            .unwrap_or_else(|| default_discriminator(definition));
        let class_id = match registered.registrar.ensure_class(definition, &discriminator).await {
            Ok(id) => id,
            Err(e) => return Err(progress.fail(Step::EnsureClass, e.into())),
        };
        state = state.class_ensured(class_id.clone());

        progress.begin(Step::CreateObject)?;
        let object_id = match registered.registrar.create_object(definition, serial, &class_id).await {
            Ok(id) => id,
            Err(e) => {
                let source = PassError::from(e);
                debug!(state = ?state.failed(source.kind()), "Registration stopped");
                return Err(progress.fail(Step::CreateObject, source));
            }
        };
        state = state.object_created(object_id.clone());
        progress.published = Some(object_id.clone());

        progress.begin(Step::SignSaveLink)?;
        let link = match registered.signer.sign(&[object_id]) {
            Ok(link) => link,
            Err(e) => {
                let source = PassError::from(e);
                debug!(state = ?state.failed(source.kind()), "Registration stopped");
                return Err(progress.fail(Step::SignSaveLink, source));
            }
        };
        state = state.done(link.url.clone());
        debug!(state = ?state, expires_at = %link.expires_at, "Registration complete");
        progress.published = Some(link.url.clone());

        self.publish_qr(&link.url, serial, Platform::Google, progress).await
    }

    async fn publish_qr(
        &self,
        artifact_url: &str,
        serial: &SerialNumber,
        platform: Platform,
        progress: &Progress<'_>,
    ) -> Result<GeneratedArtifact, GenerateError> {
        progress.begin(Step::EncodeQr)?;
        let png = self.qr.encode(artifact_url).map_err(|e| progress.fail(Step::EncodeQr, e))?;

        progress.begin(Step::PublishQr)?;
        let qr_code_url = self
            .publisher
            .publish(png, &qr_key(serial, platform), QR_CONTENT_TYPE)
            .await
            .map_err(|e| progress.fail(Step::PublishQr, e))?;

        Ok(GeneratedArtifact {
            artifact_url: artifact_url.to_string(),
            qr_code_url,
        })
    }
}

fn not_enabled(platform: Platform) -> PassError {
    PassError::InvalidPassDefinition(format!("platform {} is not enabled", platform))
}
