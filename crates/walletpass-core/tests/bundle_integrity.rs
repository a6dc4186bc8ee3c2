//! Bundle integrity tests
//!
//! Build real signed bundles with throwaway certificates, then verify them
//! the way a wallet device would: recompute member digests and check the
//! detached signature over the manifest.

use std::io::{Cursor, Write};

use walletpass_core::bundle::read_members;
use walletpass_core::testing::{minimal_definition, sample_definition, TestChain};
use walletpass_core::{
    verify_bundle, BundleBuilder, DigestAlgorithm, PassError, PassIdentity, SerialNumber,
    WebServicePolicy,
};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn builder() -> BundleBuilder {
    BundleBuilder::new(PassIdentity::new("pass.com.acme.tag", "TEAM123456"))
}

fn serial(value: &str) -> SerialNumber {
    SerialNumber::new(value).unwrap()
}

/// Rewrite an archive, letting `edit` change member contents
fn rewrite(bytes: &[u8], mut edit: impl FnMut(&str, &mut Vec<u8>)) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, mut content) in read_members(bytes).unwrap() {
        edit(&name, &mut content);
        writer.start_file(name.as_str(), SimpleFileOptions::default()).unwrap();
        writer.write_all(&content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// =============================================================================
// ROUND TRIP
// =============================================================================

#[test]
fn test_bundle_verifies_against_its_chain() {
    let chain = TestChain::generate();
    let bundle = builder()
        .build(&sample_definition(), &serial("WT-1"), &chain.material())
        .unwrap();

    let verified = verify_bundle(&bundle.bytes, DigestAlgorithm::Sha1, &[chain.intermediate.clone()])
        .unwrap();
    assert_eq!(verified.manifest, bundle.manifest);
    assert_eq!(verified.descriptor["serialNumber"], "WT-1");
    assert_eq!(verified.descriptor["passTypeIdentifier"], "pass.com.acme.tag");
    assert_eq!(verified.members.len(), 4);
}

#[test]
fn test_minimal_definition_bundle_verifies() {
    let chain = TestChain::generate();
    let bundle = builder()
        .build(&minimal_definition(), &serial("WT-MIN"), &chain.material())
        .unwrap();

    let verified = verify_bundle(&bundle.bytes, DigestAlgorithm::Sha1, &[chain.intermediate.clone()])
        .unwrap();
    assert!(verified.descriptor.get("barcodes").is_none());
    assert!(verified.descriptor.get("locations").is_none());
}

#[test]
fn test_sha256_bundle_verifies_with_sha256() {
    let chain = TestChain::generate();
    let bundle = builder()
        .with_digest_algorithm(DigestAlgorithm::Sha256)
        .build(&sample_definition(), &serial("WT-256"), &chain.material())
        .unwrap();

    verify_bundle(&bundle.bytes, DigestAlgorithm::Sha256, &[chain.intermediate.clone()]).unwrap();
}

#[test]
fn test_web_service_defaults_are_signed_into_bundle() {
    let chain = TestChain::generate();
    let bundle = builder()
        .with_web_service(WebServicePolicy::DefaultBase("https://passes.acme.test".into()))
        .build(&minimal_definition(), &serial("WT-WS"), &chain.material())
        .unwrap();

    let verified = verify_bundle(&bundle.bytes, DigestAlgorithm::Sha1, &[chain.intermediate.clone()])
        .unwrap();
    assert_eq!(
        verified.descriptor["webServiceURL"],
        "https://passes.acme.test/api/passes/apple/WT-WS"
    );
}

#[test]
fn test_rebuild_recomputes_manifest() {
    let chain = TestChain::generate();
    let first = builder()
        .build(&minimal_definition(), &serial("WT-R"), &chain.material())
        .unwrap();
    let mut changed = minimal_definition();
    changed.description = "Changed description".into();
    let second = builder()
        .build(&changed, &serial("WT-R"), &chain.material())
        .unwrap();

    assert_ne!(first.manifest.get("pass.json"), second.manifest.get("pass.json"));
    assert_eq!(first.manifest.get("icon.png"), second.manifest.get("icon.png"));
}

// =============================================================================
// NEGATIVE INTEGRITY
// =============================================================================

#[test]
fn test_mutating_any_member_invalidates_bundle() {
    let chain = TestChain::generate();
    let bundle = builder()
        .build(&sample_definition(), &serial("WT-1"), &chain.material())
        .unwrap();
    let anchors = [chain.intermediate.clone()];

    for target in ["pass.json", "icon.png", "icon@2x.png", "icon@3x.png", "manifest.json", "signature"] {
        let tampered = rewrite(&bundle.bytes, |name, content| {
            if name == target {
                let last = content.len() - 1;
                content[last] ^= 0xff;
            }
        });
        let result = verify_bundle(&tampered, DigestAlgorithm::Sha1, &anchors);
        assert!(
            matches!(result, Err(PassError::SigningFailed(_))),
            "tampering with {} should fail verification",
            target
        );
    }
}

#[test]
fn test_untampered_rewrite_still_verifies() {
    let chain = TestChain::generate();
    let bundle = builder()
        .build(&sample_definition(), &serial("WT-1"), &chain.material())
        .unwrap();

    let copy = rewrite(&bundle.bytes, |_, _| {});
    verify_bundle(&copy, DigestAlgorithm::Sha1, &[chain.intermediate.clone()]).unwrap();
}

#[test]
fn test_digest_algorithm_mismatch_fails() {
    let chain = TestChain::generate();
    let anchors = [chain.intermediate.clone()];

    let sha1 = builder()
        .build(&sample_definition(), &serial("WT-A"), &chain.material())
        .unwrap();
    assert!(verify_bundle(&sha1.bytes, DigestAlgorithm::Sha256, &anchors).is_err());

    let sha256 = builder()
        .with_digest_algorithm(DigestAlgorithm::Sha256)
        .build(&sample_definition(), &serial("WT-B"), &chain.material())
        .unwrap();
    assert!(verify_bundle(&sha256.bytes, DigestAlgorithm::Sha1, &anchors).is_err());
}

#[test]
fn test_foreign_chain_does_not_verify() {
    let chain = TestChain::generate();
    let foreign = TestChain::generate();
    let bundle = builder()
        .build(&sample_definition(), &serial("WT-1"), &chain.material())
        .unwrap();

    let result = verify_bundle(&bundle.bytes, DigestAlgorithm::Sha1, &[foreign.intermediate.clone()]);
    assert!(result.is_err());
}

#[test]
fn test_missing_signature_is_rejected() {
    let chain = TestChain::generate();
    let bundle = builder()
        .build(&sample_definition(), &serial("WT-1"), &chain.material())
        .unwrap();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in read_members(&bundle.bytes).unwrap() {
        if name == "signature" {
            continue;
        }
        writer.start_file(name.as_str(), SimpleFileOptions::default()).unwrap();
        writer.write_all(&content).unwrap();
    }
    let stripped = writer.finish().unwrap().into_inner();

    let err = verify_bundle(&stripped, DigestAlgorithm::Sha1, &[chain.intermediate.clone()])
        .unwrap_err();
    assert!(err.to_string().contains("no signature"));
}
