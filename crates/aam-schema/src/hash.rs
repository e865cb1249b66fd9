//! SHA-256 digests for archives and installed files.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// A validated SHA-256 digest (64 lowercase hex characters).
///
/// Validation happens at construction and deserialization time, so an
/// invalid hex string never propagates into the index or the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let hex = s.trim().strip_prefix("sha256:").unwrap_or(s.trim());

        if hex.len() != 64 {
            anyhow::bail!(
                "Invalid SHA256 digest: expected 64 hex characters, got {} in '{s}'",
                hex.len(),
            );
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid SHA256 digest: contains non-hex characters in '{s}'");
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Compute the digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Compute the digest of a file by streaming it through the hasher.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let count = file.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_matches_known_vector() {
        let digest = Sha256Digest::compute(b"abc");
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn accepts_prefix_and_uppercase() {
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let digest = Sha256Digest::new(format!("sha256:{upper}")).unwrap();
        assert_eq!(digest, Sha256Digest::compute(b"abc"));
    }

    #[test]
    fn rejects_bad_digests() {
        assert!(Sha256Digest::new("abc").is_err());
        assert!(Sha256Digest::new("z".repeat(64)).is_err());
    }

    #[test]
    fn file_digest_matches_buffer_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"some artifact bytes").unwrap();
        assert_eq!(
            Sha256Digest::compute_file(&path).unwrap(),
            Sha256Digest::compute(b"some artifact bytes")
        );
    }
}
