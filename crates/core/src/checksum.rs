//! Content checksums.
//!
//! Checksums are carried as `{type, sum}` records where `sum` is a lowercase
//! hex digest. Two checksums match only if both fields are exactly equal.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Supported checksum algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    #[default]
    Sha256,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// A typed content checksum.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: ChecksumType,
    pub sum: String,
}

impl Checksum {
    /// Wrap an existing sha256 hex digest.
    pub fn sha256(sum: impl Into<String>) -> Self {
        Self {
            kind: ChecksumType::Sha256,
            sum: sum.into(),
        }
    }

    /// Compute the sha256 checksum of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ChecksumHasher {
        ChecksumHasher(Sha256::new())
    }

    /// Parse a sha256 hex digest, rejecting anything that is not 64 hex chars.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidChecksum(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidChecksum(format!(
                "not a hex digest: {s}"
            )));
        }
        Ok(Self::sha256(s.to_ascii_lowercase()))
    }

    /// Verify that `self` (the computed checksum) matches `expected`.
    pub fn verify(&self, expected: &Checksum) -> crate::Result<()> {
        if expected.kind != ChecksumType::Sha256 {
            return Err(crate::Error::UnsupportedChecksumType(
                expected.kind.as_str().to_string(),
            ));
        }
        if self.kind != expected.kind || self.sum != expected.sum {
            return Err(crate::Error::ChecksumMismatch {
                expected: expected.sum.clone(),
                actual: self.sum.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.sum)
    }
}

/// Incremental SHA-256 hasher producing a [`Checksum`].
#[derive(Clone, Default)]
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the checksum.
    pub fn finalize(self) -> Checksum {
        Checksum::sha256(to_hex(&self.0.finalize()))
    }
}

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
