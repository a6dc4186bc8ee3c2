//! Throwaway signing material and fixtures for tests
//!
//! Available to this crate's tests and, through the `test-support` feature,
//! to dependent crates.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};

use crate::crypto::SigningMaterial;
use crate::types::{Barcode, BarcodeFormat, Location, PassDefinition};

/// An authority certificate and a signer certificate it issued
pub struct TestChain {
    pub intermediate: X509,
    pub intermediate_key: PKey<Private>,
    pub signer_cert: X509,
    pub signer_key: PKey<Private>,
}

impl TestChain {
    /// Generate a fresh chain
    pub fn generate() -> Self {
        let intermediate_key = rsa_key();
        let authority = name("Test Pass Authority");
        let mut builder = certificate(1, &authority, &authority, &intermediate_key);
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().expect("constraints"))
            .expect("append constraints");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("key usage"),
            )
            .expect("append key usage");
        builder
            .sign(&intermediate_key, MessageDigest::sha256())
            .expect("sign authority");
        let intermediate = builder.build();

        let signer_key = rsa_key();
        let mut builder = certificate(2, &name("pass.com.acme.tag"), &authority, &signer_key);
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .build()
                    .expect("key usage"),
            )
            .expect("append key usage");
        builder
            .sign(&intermediate_key, MessageDigest::sha256())
            .expect("sign signer");
        let signer_cert = builder.build();

        Self {
            intermediate,
            intermediate_key,
            signer_cert,
            signer_key,
        }
    }

    /// Parsed material ready for signing
    pub fn material(&self) -> SigningMaterial {
        SigningMaterial::new(
            self.intermediate.clone(),
            self.signer_cert.clone(),
            self.signer_key.clone(),
        )
    }

    /// Authority certificate as PEM
    pub fn intermediate_pem(&self) -> Vec<u8> {
        self.intermediate.to_pem().expect("authority pem")
    }

    /// Signer certificate as PEM
    pub fn signer_cert_pem(&self) -> Vec<u8> {
        self.signer_cert.to_pem().expect("signer pem")
    }

    /// Unencrypted PKCS#8 signer key
    pub fn signer_key_pem(&self) -> Vec<u8> {
        self.signer_key.private_key_to_pem_pkcs8().expect("key pem")
    }

    /// Passphrase-protected PKCS#8 signer key
    pub fn signer_key_pem_encrypted(&self, passphrase: &str) -> Vec<u8> {
        self.signer_key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .expect("encrypted key pem")
    }
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey")
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().expect("name builder");
    builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .expect("common name");
    builder.build()
}

fn certificate(serial: u32, subject: &X509Name, issuer: &X509Name, key: &PKey<Private>) -> X509Builder {
    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(serial)
        .and_then(|n| n.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder.set_subject_name(subject).expect("subject");
    builder.set_issuer_name(issuer).expect("issuer");
    builder.set_pubkey(key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("now"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("later"))
        .expect("not after");
    builder
}

/// RSA key pair as (PKCS#8 private PEM, SubjectPublicKeyInfo PEM)
pub fn rsa_key_pair_pem() -> (Vec<u8>, Vec<u8>) {
    let key = rsa_key();
    (
        key.private_key_to_pem_pkcs8().expect("private pem"),
        key.public_key_to_pem().expect("public pem"),
    )
}

/// A definition exercising every optional section
pub fn sample_definition() -> PassDefinition {
    PassDefinition::new(
        "Acme Corp",
        "VIP access tag",
        "ACME",
        "#FFFFFF",
        "#1A237E",
    )
    .with_label_color("#C5CAE9")
    .with_relevant_date("2026-06-01T09:00:00Z")
    .with_location(Location::new(37.3349, -122.0090).with_relevant_text("Welcome to Acme"))
    .with_max_distance(250.0)
    .with_barcode(Barcode::new("ACME-VIP", BarcodeFormat::Qr).with_alt_text("VIP"))
}

/// A definition with only the required fields
pub fn minimal_definition() -> PassDefinition {
    PassDefinition::new("Acme", "VIP", "ACME", "#000000", "#FFFFFF")
}
