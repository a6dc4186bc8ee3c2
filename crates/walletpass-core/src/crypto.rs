//! Detached PKCS#7 signatures over bundle manifests
//!
//! The signer certificate and key sign the manifest bytes; the intermediate
//! authority certificate travels inside the signature so a device can build
//! the chain up to its trusted root.

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;

use crate::error::{PassError, Result};

/// Parsed signing material
///
/// Built once by the certificate provider and shared read-only afterwards.
#[derive(Clone)]
pub struct SigningMaterial {
    /// Intermediate authority certificate
    intermediate: X509,
    /// Signer certificate
    signer_cert: X509,
    /// Signer private key
    signer_key: PKey<Private>,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("signer_subject", &subject_name(&self.signer_cert))
            .field("intermediate_subject", &subject_name(&self.intermediate))
            .field("signer_key", &"[redacted]")
            .finish()
    }
}

fn subject_name(cert: &X509) -> String {
    cert.subject_name()
        .entries()
        .filter_map(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Which piece of material failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialPart {
    Intermediate,
    SignerCert,
    SignerKey,
}

impl SigningMaterial {
    /// Assemble material from parsed parts
    pub fn new(intermediate: X509, signer_cert: X509, signer_key: PKey<Private>) -> Self {
        Self {
            intermediate,
            signer_cert,
            signer_key,
        }
    }

    /// Parse PEM-encoded material, decrypting the key with `passphrase` when given
    ///
    /// On failure, reports which part was malformed along with the parser error.
    pub fn from_pem(
        intermediate: &[u8],
        signer_cert: &[u8],
        signer_key: &[u8],
        passphrase: Option<&str>,
    ) -> std::result::Result<Self, (MaterialPart, String)> {
        let intermediate = X509::from_pem(intermediate)
            .map_err(|e| (MaterialPart::Intermediate, e.to_string()))?;
        let signer_cert =
            X509::from_pem(signer_cert).map_err(|e| (MaterialPart::SignerCert, e.to_string()))?;
        let signer_key = match passphrase.filter(|p| !p.is_empty()) {
            Some(pass) => PKey::private_key_from_pem_passphrase(signer_key, pass.as_bytes()),
            None => PKey::private_key_from_pem(signer_key),
        }
        .map_err(|e| (MaterialPart::SignerKey, e.to_string()))?;

        if !signer_cert
            .public_key()
            .map(|pk| pk.public_eq(&signer_key))
            .unwrap_or(false)
        {
            return Err((
                MaterialPart::SignerKey,
                "private key does not match signer certificate".to_string(),
            ));
        }

        Ok(Self::new(intermediate, signer_cert, signer_key))
    }

    /// Intermediate authority certificate
    pub fn intermediate(&self) -> &X509 {
        &self.intermediate
    }

    /// Signer certificate
    pub fn signer_cert(&self) -> &X509 {
        &self.signer_cert
    }

    /// Produce a DER detached signature over `data`
    pub fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut certs = Stack::new()?;
        certs.push(self.intermediate.clone())?;

        let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY;
        let pkcs7 = Pkcs7::sign(&self.signer_cert, &self.signer_key, &certs, data, flags)
            .map_err(|e| PassError::SigningFailed(e.to_string()))?;

        pkcs7
            .to_der()
            .map_err(|e| PassError::SigningFailed(e.to_string()))
    }
}

/// Verify a DER detached signature over `data` against trust anchors
///
/// Chain building uses the certificates embedded in the signature; at least
/// one anchor must terminate the chain.
pub fn verify_detached(signature: &[u8], data: &[u8], anchors: &[X509]) -> Result<()> {
    let pkcs7 = Pkcs7::from_der(signature)
        .map_err(|e| PassError::SigningFailed(format!("malformed signature: {}", e)))?;

    let mut store = X509StoreBuilder::new()?;
    for anchor in anchors {
        store.add_cert(anchor.clone())?;
    }
    let store = store.build();
    let extra = Stack::new()?;

    pkcs7
        .verify(&extra, &store, Some(data), None, Pkcs7Flags::BINARY)
        .map_err(|e| PassError::SigningFailed(format!("signature verification failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChain;

    #[test]
    fn test_sign_and_verify_detached() {
        let chain = TestChain::generate();
        let material = chain.material();

        let signature = material.sign_detached(b"manifest bytes").unwrap();
        verify_detached(&signature, b"manifest bytes", &[chain.intermediate.clone()]).unwrap();
    }

    #[test]
    fn test_verification_fails_for_other_data() {
        let chain = TestChain::generate();
        let signature = chain.material().sign_detached(b"manifest bytes").unwrap();

        let result = verify_detached(&signature, b"manifest bytez", &[chain.intermediate.clone()]);
        assert!(matches!(result, Err(PassError::SigningFailed(_))));
    }

    #[test]
    fn test_verification_fails_with_unrelated_anchor() {
        let chain = TestChain::generate();
        let other = TestChain::generate();
        let signature = chain.material().sign_detached(b"data").unwrap();

        assert!(verify_detached(&signature, b"data", &[other.intermediate.clone()]).is_err());
    }

    #[test]
    fn test_from_pem_with_passphrase() {
        let chain = TestChain::generate();
        let key_pem = chain.signer_key_pem_encrypted("s3cret");

        let material = SigningMaterial::from_pem(
            &chain.intermediate_pem(),
            &chain.signer_cert_pem(),
            &key_pem,
            Some("s3cret"),
        );
        assert!(material.is_ok());

        let wrong = SigningMaterial::from_pem(
            &chain.intermediate_pem(),
            &chain.signer_cert_pem(),
            &key_pem,
            Some("nope"),
        );
        assert_eq!(wrong.unwrap_err().0, MaterialPart::SignerKey);
    }

    #[test]
    fn test_from_pem_reports_malformed_part() {
        let chain = TestChain::generate();
        let err = SigningMaterial::from_pem(
            b"not a certificate",
            &chain.signer_cert_pem(),
            &chain.signer_key_pem(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.0, MaterialPart::Intermediate);
    }

    #[test]
    fn test_from_pem_rejects_mismatched_key() {
        let chain = TestChain::generate();
        let other = TestChain::generate();
        let err = SigningMaterial::from_pem(
            &chain.intermediate_pem(),
            &chain.signer_cert_pem(),
            &other.signer_key_pem(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.0, MaterialPart::SignerKey);
    }

    #[test]
    fn test_debug_redacts_key() {
        let chain = TestChain::generate();
        let debug = format!("{:?}", chain.material());
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
