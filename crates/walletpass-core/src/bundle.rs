//! Signed pass bundle assembly and verification
//!
//! A bundle is a ZIP archive holding the descriptor, icons, a manifest of
//! member digests, and a detached signature over the manifest bytes.

use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use openssl::x509::X509;

use crate::crypto::{verify_detached, SigningMaterial};
use crate::descriptor::{DescriptorBuilder, PassDescriptor, PassIdentity, WebServicePolicy};
use crate::error::{PassError, Result};
use crate::manifest::{BundleManifest, DigestAlgorithm};
use crate::qr::placeholder_icon;
use crate::types::{PassDefinition, SerialNumber};

/// Member name of the descriptor
pub const DESCRIPTOR_MEMBER: &str = "pass.json";
/// Member name of the manifest
pub const MANIFEST_MEMBER: &str = "manifest.json";
/// Member name of the detached signature
pub const SIGNATURE_MEMBER: &str = "signature";
/// Icon members, one per display scale
pub const ICON_MEMBERS: [&str; 3] = ["icon.png", "icon@2x.png", "icon@3x.png"];

/// Content type for published bundles
pub const BUNDLE_CONTENT_TYPE: &str = "application/vnd.apple.pkpass";

/// A finished bundle
#[derive(Debug, Clone)]
pub struct PassBundle {
    /// ZIP archive bytes
    pub bytes: Vec<u8>,
    /// Manifest that was signed
    pub manifest: BundleManifest,
    /// Descriptor placed in the archive
    pub descriptor: PassDescriptor,
}

/// Builds signed bundles for one issuer identity
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    identity: PassIdentity,
    web_service: WebServicePolicy,
    algorithm: DigestAlgorithm,
}

impl BundleBuilder {
    /// Create a builder with the default digest algorithm and no web-service default
    pub fn new(identity: PassIdentity) -> Self {
        Self {
            identity,
            web_service: WebServicePolicy::Omit,
            algorithm: DigestAlgorithm::default(),
        }
    }

    /// Set the web-service default policy
    pub fn with_web_service(mut self, policy: WebServicePolicy) -> Self {
        self.web_service = policy;
        self
    }

    /// Set the manifest digest algorithm
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Digest algorithm this builder writes manifests with
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Build and sign a bundle
    ///
    /// Nothing is retained between calls; the manifest and signature are
    /// recomputed from scratch every time.
    pub fn build(
        &self,
        definition: &PassDefinition,
        serial: &SerialNumber,
        material: &SigningMaterial,
    ) -> Result<PassBundle> {
        let descriptor = DescriptorBuilder::new(definition, serial, &self.identity)
            .web_service(&self.web_service)
            .build()?;

        let icon = placeholder_icon()?;
        let mut members: Vec<(&str, Vec<u8>)> = vec![(DESCRIPTOR_MEMBER, descriptor.to_bytes()?)];
        for name in ICON_MEMBERS {
            members.push((name, icon.clone()));
        }

        let mut manifest = BundleManifest::new(self.algorithm);
        for (name, bytes) in &members {
            manifest.add(*name, bytes);
        }
        let manifest_bytes = manifest.to_bytes()?;
        let signature = material.sign_detached(&manifest_bytes)?;

        members.push((MANIFEST_MEMBER, manifest_bytes));
        members.push((SIGNATURE_MEMBER, signature));

        let bytes = write_archive(&members)?;
        debug!(
            serial = %serial,
            members = members.len(),
            size = bytes.len(),
            algorithm = ?self.algorithm,
            "Built pass bundle"
        );

        Ok(PassBundle {
            bytes,
            manifest,
            descriptor,
        })
    }
}

fn write_archive(members: &[(&str, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in members {
        writer.start_file(*name, options)?;
        writer
            .write_all(bytes)
            .map_err(|e| PassError::SigningFailed(format!("archive: {}", e)))?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Contents of a bundle that passed verification
#[derive(Debug, Clone)]
pub struct VerifiedBundle {
    /// Parsed manifest
    pub manifest: BundleManifest,
    /// Parsed descriptor
    pub descriptor: serde_json::Value,
    /// Every archive member except the manifest and signature
    pub members: Vec<(String, Vec<u8>)>,
}

/// Read every member of a bundle archive
pub fn read_members(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| PassError::SigningFailed(format!("archive: {}", e)))?;
        members.push((file.name().to_string(), content));
    }
    Ok(members)
}

/// Verify a bundle's signature and manifest
///
/// Digests are recomputed with `algorithm`; a bundle built with a different
/// algorithm fails. The signature must chain to one of `anchors`.
pub fn verify_bundle(
    bytes: &[u8],
    algorithm: DigestAlgorithm,
    anchors: &[X509],
) -> Result<VerifiedBundle> {
    let mut manifest_bytes = None;
    let mut signature = None;
    let mut members = Vec::new();
    for (name, content) in read_members(bytes)? {
        match name.as_str() {
            MANIFEST_MEMBER => manifest_bytes = Some(content),
            SIGNATURE_MEMBER => signature = Some(content),
            _ => members.push((name, content)),
        }
    }

    let manifest_bytes = manifest_bytes
        .ok_or_else(|| PassError::SigningFailed("bundle has no manifest".into()))?;
    let signature =
        signature.ok_or_else(|| PassError::SigningFailed("bundle has no signature".into()))?;

    verify_detached(&signature, &manifest_bytes, anchors)?;

    let manifest = BundleManifest::from_bytes(&manifest_bytes, algorithm)?;
    if let Some((name, _)) = manifest
        .entries()
        .find(|(_, digest)| digest.len() != algorithm.hex_len())
    {
        return Err(PassError::SigningFailed(format!(
            "manifest entry '{}' is not a {:?} digest",
            name, algorithm
        )));
    }

    let bad = manifest.mismatches(&members);
    if !bad.is_empty() {
        return Err(PassError::SigningFailed(format!(
            "manifest mismatch for: {}",
            bad.join(", ")
        )));
    }

    let descriptor = members
        .iter()
        .find(|(name, _)| name == DESCRIPTOR_MEMBER)
        .map(|(_, content)| serde_json::from_slice(content))
        .transpose()
        .map_err(|e| PassError::SigningFailed(format!("descriptor: {}", e)))?
        .ok_or_else(|| PassError::SigningFailed("bundle has no descriptor".into()))?;

    Ok(VerifiedBundle {
        manifest,
        descriptor,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_definition, TestChain};

    fn builder() -> BundleBuilder {
        BundleBuilder::new(PassIdentity::new("pass.com.acme.tag", "TEAM123456"))
    }

    #[test]
    fn test_bundle_has_expected_members() {
        let chain = TestChain::generate();
        let serial = SerialNumber::new("WT-1").unwrap();
        let bundle = builder()
            .build(&sample_definition(), &serial, &chain.material())
            .unwrap();

        let names: Vec<String> = read_members(&bundle.bytes)
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(
            names,
            vec!["pass.json", "icon.png", "icon@2x.png", "icon@3x.png", "manifest.json", "signature"]
        );
        assert_eq!(bundle.manifest.len(), 4);
    }

    #[test]
    fn test_manifest_excludes_itself_and_signature() {
        let chain = TestChain::generate();
        let serial = SerialNumber::new("WT-2").unwrap();
        let bundle = builder()
            .build(&sample_definition(), &serial, &chain.material())
            .unwrap();

        assert!(bundle.manifest.get(MANIFEST_MEMBER).is_none());
        assert!(bundle.manifest.get(SIGNATURE_MEMBER).is_none());
    }

    #[test]
    fn test_invalid_definition_is_rejected_before_signing() {
        let chain = TestChain::generate();
        let serial = SerialNumber::new("WT-3").unwrap();
        let mut definition = sample_definition();
        definition.background_color = "blue".into();

        let err = builder()
            .build(&definition, &serial, &chain.material())
            .unwrap_err();
        assert!(matches!(err, PassError::InvalidPassDefinition(_)));
    }

    #[test]
    fn test_verify_rejects_non_archive() {
        let err = verify_bundle(b"not a zip", DigestAlgorithm::Sha1, &[]).unwrap_err();
        assert!(matches!(err, PassError::SigningFailed(_)));
    }
}
