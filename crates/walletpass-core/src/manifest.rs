//! Bundle manifest: member name to content digest
//!
//! The manifest is the unit the detached signature covers. Member files are
//! bound to it through their digests, so a verifier must recompute digests
//! with the same algorithm the builder used.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{PassError, Result};

/// Digest algorithm used for manifest entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1, the algorithm wallet devices check manifests with
    #[default]
    Sha1,
    /// SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Hex digest of `bytes`
    pub fn hex_digest(&self, bytes: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Length of a hex digest produced by this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(format!("Unknown digest algorithm: {}", s)),
        }
    }
}

/// Ordered mapping from bundle member name to hex digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleManifest {
    algorithm: DigestAlgorithm,
    entries: Vec<(String, String)>,
}

impl BundleManifest {
    /// Create an empty manifest
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            entries: Vec::new(),
        }
    }

    /// Digest a member and record it, replacing any earlier entry for the name
    pub fn add(&mut self, name: impl Into<String>, bytes: &[u8]) {
        let name = name.into();
        let digest = self.algorithm.hex_digest(bytes);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = digest,
            None => self.entries.push((name, digest)),
        }
    }

    /// Digest recorded for a member
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_str())
    }

    /// Algorithm the digests were computed with
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the exact bytes that get signed
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| PassError::SigningFailed(e.to_string()))
    }

    /// Parse manifest bytes taken from a bundle
    ///
    /// The algorithm is not recorded in the manifest; the caller states
    /// which one the digests are expected to use.
    pub fn from_bytes(bytes: &[u8], algorithm: DigestAlgorithm) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| PassError::SigningFailed(format!("manifest: {}", e)))?;
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            let digest = value.as_str().ok_or_else(|| {
                PassError::SigningFailed(format!("manifest entry '{}' is not a string", name))
            })?;
            entries.push((name, digest.to_string()));
        }
        Ok(Self { algorithm, entries })
    }

    /// Names whose recorded digest differs from the digest of `members`
    ///
    /// Members missing from the manifest and manifest entries missing from
    /// `members` are both reported.
    pub fn mismatches(&self, members: &[(String, Vec<u8>)]) -> Vec<String> {
        let mut bad = Vec::new();
        for (name, bytes) in members {
            match self.get(name) {
                Some(digest) if digest == self.algorithm.hex_digest(bytes) => {}
                _ => bad.push(name.clone()),
            }
        }
        for (name, _) in &self.entries {
            if !members.iter().any(|(m, _)| m == name) {
                bad.push(name.clone());
            }
        }
        bad
    }
}

impl Serialize for BundleManifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, digest) in &self.entries {
            map.serialize_entry(name, digest)?;
        }
        map.end()
    }
}
