use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Error produced when a checksum string is not a valid SHA-256 digest.
#[derive(Error, Debug)]
#[error("invalid SHA256 checksum: expected 64 hex chars, got '{0}'")]
pub struct InvalidChecksum(String);

/// Newtype for a SHA-256 checksum (64 lowercase hex characters).
///
/// Provides compile-time distinction from other strings; artifact sources
/// declare one per artifact and the installer verifies it before any live
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Create a validated `Sha256Hash` (64 ASCII hex characters, lowercased).
    pub fn validated(s: &str) -> Result<Self, InvalidChecksum> {
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidChecksum(s.to_string()))
        }
    }

    /// Compute the SHA-256 checksum of in-memory data.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Compute the SHA-256 checksum of a file, streaming its contents.
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        use std::io::Read;

        let mut hasher = Sha256::new();
        let mut file = std::fs::File::open(path)?;
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

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
