//! Hashes tagged with their algorithm name.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::nix_base32;

/// A hash value carrying its algorithm name, e.g.
/// `sha256:07pyb1bl3q4ivh86vx6vjjivfsm1hqrwdfm5d2x8kk7qzysl5j4j`.
///
/// The value part is decoded as nix base32, falling back to hex. It is
/// always re-emitted in nix base32.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedHash {
    pub algo: String,
    pub bytes: Vec<u8>,
}

impl TypedHash {
    /// Computes the sha256 hash of the given bytes.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algo: "sha256".to_string(),
            bytes: Sha256::digest(data).to_vec(),
        }
    }

    /// Wraps an already-computed digest under the given algorithm name.
    pub fn from_digest(algo: &str, bytes: Vec<u8>) -> Self {
        Self {
            algo: algo.to_string(),
            bytes,
        }
    }
}

impl FromStr for TypedHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, encoded) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_data(s))?;

        let bytes = match nix_base32::decode(encoded) {
            Ok(bytes) => bytes,
            // Nix also emits hex-encoded hashes in the same fields, so try
            // a hex decode before giving up.
            Err(err) => hex::decode(encoded).map_err(|_| err)?,
        };

        Ok(Self {
            algo: algo.to_string(),
            bytes,
        })
    }
}

impl fmt::Display for TypedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.algo.is_empty() {
            return Ok(());
        }
        write!(f, "{}:{}", self.algo, nix_base32::encode(&self.bytes))
    }
}
