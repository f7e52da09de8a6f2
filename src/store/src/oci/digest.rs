//! Content digests used as store keys.
//!
//! A digest is only accepted when its algorithm is known and its hex part
//! has the exact length for that algorithm, so `Digest::hex` is always safe
//! to use as a single directory name.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use layerdb_core::error::{LayerdbError, Result};
use sha2::{Digest as _, Sha256, Sha512};

/// Hash algorithm of a content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

/// Validated `algorithm:hex` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Parse a digest string such as `sha256:3f4a...`.
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| LayerdbError::DigestError(format!("{value}: missing algorithm")))?;

        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            other => {
                return Err(LayerdbError::DigestError(format!(
                    "{value}: unsupported algorithm '{other}'"
                )))
            }
        };

        if hex.len() != algorithm.hex_len() {
            return Err(LayerdbError::DigestError(format!(
                "{value}: expected {} hex characters, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(LayerdbError::DigestError(format!(
                "{value}: digest must be lowercase hex"
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Rebuild a digest from a store directory name.
    ///
    /// The algorithm is inferred from the hex length.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let algorithm = match hex.len() {
            64 => DigestAlgorithm::Sha256,
            128 => DigestAlgorithm::Sha512,
            _ => {
                return Err(LayerdbError::DigestError(format!(
                    "{hex}: not a digest directory name"
                )))
            }
        };
        Self::parse(&format!("{}:{}", algorithm.as_str(), hex))
    }

    /// SHA-256 digest of a byte slice.
    pub fn sha256_of(data: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Hex part of the digest, used as the store directory name.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Hash everything `reader` yields and compare it with this digest.
    pub fn verify(&self, mut reader: impl Read) -> std::io::Result<bool> {
        let actual = match self.algorithm {
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                std::io::copy(&mut reader, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
            DigestAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                std::io::copy(&mut reader, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
        };
        Ok(actual == self.hex)
    }
}

impl FromStr for Digest {
    type Err = LayerdbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}
