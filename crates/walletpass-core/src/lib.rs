//! # Walletpass Core
//!
//! Pass data model and the CPU-bound half of pass generation: descriptor
//! construction, manifest digests, detached signatures, bundle archives and
//! QR rendering. Nothing in this crate performs I/O.
//!
//! ## Key Concepts
//!
//! - **Definition**: Platform-agnostic pass content supplied by the caller
//! - **Descriptor**: The `pass.json` document derived from a definition
//! - **Manifest**: Member name to digest map; the unit that gets signed
//! - **Bundle**: ZIP archive of descriptor, icons, manifest and signature
//!
//! ## Bundle Integrity
//!
//! 1. Every member except the manifest and signature has a manifest entry
//! 2. Each entry is the digest of the exact member bytes
//! 3. The signature covers the exact manifest bytes and chains to the authority

pub mod bundle;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod qr;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bundle::{verify_bundle, BundleBuilder, PassBundle, VerifiedBundle, BUNDLE_CONTENT_TYPE};
pub use crypto::{verify_detached, MaterialPart, SigningMaterial};
pub use descriptor::{DescriptorBuilder, PassDescriptor, PassIdentity, WebServicePolicy};
pub use error::{Disposition, PassError, Result};
pub use manifest::{BundleManifest, DigestAlgorithm};
pub use qr::{ErrorCorrection, QrConfig, QrEncoder, MAX_QR_EDGE};
pub use types::{
    Barcode, BarcodeFormat, GeneratedArtifact, Location, Nfc, PassDefinition, Platform, Rgb,
    SerialNumber,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
