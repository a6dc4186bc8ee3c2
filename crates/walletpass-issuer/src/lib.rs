//! Walletpass Issuer
//!
//! Turns a pass definition and serial number into a published artifact and
//! a QR image pointing at it. Binary passes are signed bundles published to
//! durable storage; registered passes are remote wallet objects reached
//! through a signed save link.
//!
//! ## Components
//!
//! - [`keys`]: signing material, cached and loaded once per process
//! - [`storage`]: artifact stores (memory, directory, S3-compatible)
//! - [`orchestrator`]: step sequencing, cancellation and error reporting
//! - [`config`]: `WALLETPASS_*` environment configuration
//!
//! ## Storage Layout
//!
//! - `apple-passes/{serial}.pkpass` - signed bundle
//! - `qr-codes/{serial}_qr.png` - QR of the bundle URL
//! - `qr-codes/{serial}_google_qr.png` - QR of the save link
//! - `certificates/{name}` - signing material, when read from the store

pub mod config;
pub mod keys;
pub mod orchestrator;
pub mod storage;

pub use config::{ConfigError, IssuerConfig, StorageBackend};
pub use keys::{CertificateNames, CertificateProvider, DirectorySource, MaterialSource, ObjectStoreSource};
pub use orchestrator::{GenerateError, PassOrchestrator, Step};
pub use storage::{
    ArtifactPublisher, ArtifactStore, DirectoryStore, MemoryStore, S3Config, S3Store, StorageError,
};
