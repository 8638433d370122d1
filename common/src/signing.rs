//! Named keys and detached signatures.
//!
//! Nix utilitizes Ed25519 to sign the fingerprint of a store object.
//! All signing-related strings follow the same canonical format:
//!
//! ```text
//! {keyName}:{base64Payload}
//! ```
//!
//! We follow the same format, so keys generated using the Nix CLI will
//! simply work. Public keys carry a 32-byte payload, private keys a
//! 64-byte payload (seed and public half), and signatures 64 bytes.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{de, ser, Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SIGNATURE_BYTES: usize = ed25519_compact::Signature::BYTES;

/// A named ed25519 public key for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPublicKey {
    /// Name of this key.
    name: String,

    /// The public key.
    key: ed25519_compact::PublicKey,
}

/// A named ed25519 private key for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPrivateKey {
    /// Name of this key.
    name: String,

    /// The secret key.
    key: ed25519_compact::SecretKey,
}

/// A detached signature over a manifest fingerprint.
///
/// Equality and ordering compare both the key name and the raw bytes. The
/// bytes are not validated beyond their length, so any 64-byte payload
/// round-trips.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signature {
    name: String,
    bytes: [u8; SIGNATURE_BYTES],
}

impl NamedPublicKey {
    /// Name of this key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw 32 key bytes.
    pub fn key_bytes(&self) -> [u8; ed25519_compact::PublicKey::BYTES] {
        *self.key
    }

    /// Verifies a signature over the given fingerprint.
    ///
    /// Only the cryptographic material is consulted. A signature whose
    /// name differs from this key's name still verifies if the bytes
    /// match; names are advisory.
    pub fn verify_fingerprint(&self, fingerprint: &[u8], signature: &Signature) -> bool {
        let signature = ed25519_compact::Signature::new(signature.bytes);
        self.key.verify(fingerprint, &signature).is_ok()
    }
}

impl NamedPrivateKey {
    /// Generates a new private key.
    pub fn generate(name: &str) -> Result<Self> {
        validate_name(name, "private key")?;
        let keypair = ed25519_compact::KeyPair::generate();

        Ok(Self {
            name: name.to_string(),
            key: keypair.sk,
        })
    }

    /// Name of this key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the public half of this key, under the same name.
    pub fn public_key(&self) -> NamedPublicKey {
        NamedPublicKey {
            name: self.name.clone(),
            key: self.key.public_key(),
        }
    }

    /// Signs a fingerprint, producing a signature named after this key.
    pub fn sign_fingerprint(&self, fingerprint: &[u8]) -> Result<Signature> {
        let signature = self.key.sign(fingerprint, None);
        Ok(Signature {
            name: self.name.clone(),
            bytes: *signature,
        })
    }
}

impl Signature {
    /// Name of the key this signature claims to come from.
    pub fn key_name(&self) -> &str {
        &self.name
    }

    /// The raw 64 signature bytes.
    pub fn bytes(&self) -> &[u8; SIGNATURE_BYTES] {
        &self.bytes
    }
}

impl FromStr for NamedPublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, bytes) = decode_string(s, "public key", ed25519_compact::PublicKey::BYTES)?;

        let key = ed25519_compact::PublicKey::from_slice(&bytes).map_err(Error::SigningError)?;

        Ok(Self {
            name: name.to_string(),
            key,
        })
    }
}

impl FromStr for NamedPrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, bytes) = decode_string(s, "private key", ed25519_compact::SecretKey::BYTES)?;

        let key = ed25519_compact::SecretKey::from_slice(&bytes).map_err(Error::SigningError)?;

        Ok(Self {
            name: name.to_string(),
            key,
        })
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, bytes) =
            decode_string(s, "signature", SIGNATURE_BYTES).map_err(|_| Error::invalid_data(s))?;

        // length checked by decode_string
        let mut raw = [0u8; SIGNATURE_BYTES];
        raw.copy_from_slice(&bytes);

        Ok(Self {
            name: name.to_string(),
            bytes: raw,
        })
    }
}

impl fmt::Display for NamedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, BASE64_STANDARD.encode(*self.key))
    }
}

impl fmt::Display for NamedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, BASE64_STANDARD.encode(*self.key))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, BASE64_STANDARD.encode(self.bytes))
    }
}

impl<'de> Deserialize<'de> for NamedPublicKey {
    /// Deserializes a public key from its canonical representation.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer)
            .and_then(|s| s.parse().map_err(|e: crate::Error| Error::custom(e.to_string())))
    }
}

impl<'de> Deserialize<'de> for NamedPrivateKey {
    /// Deserializes a private key from its canonical representation.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer)
            .and_then(|s| s.parse().map_err(|e: crate::Error| Error::custom(e.to_string())))
    }
}

impl<'de> Deserialize<'de> for Signature {
    /// Deserializes a signature from its canonical representation.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer)
            .and_then(|s| s.parse().map_err(|e: crate::Error| Error::custom(e.to_string())))
    }
}

impl Serialize for NamedPublicKey {
    /// Serializes a public key to its canonical representation.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl Serialize for NamedPrivateKey {
    /// Serializes a private key to its canonical representation.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl Serialize for Signature {
    /// Serializes a signature to its canonical representation.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Validates the name/label of a signing key.
///
/// A valid name cannot be empty and must not contain colons (:).
fn validate_name(name: &str, usage: &'static str) -> Result<()> {
    if name.is_empty() || name.contains(':') {
        Err(Error::MalformedKey {
            usage,
            input: name.to_string(),
            detail: "name must be non-empty and free of colons".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Decodes a colon-delimited string containing a key name and a base64
/// payload of the expected length.
fn decode_string<'s>(
    s: &'s str,
    usage: &'static str,
    expected_payload_length: usize,
) -> Result<(&'s str, Vec<u8>)> {
    let (name, payload) = s.split_once(':').ok_or_else(|| Error::MalformedKey {
        usage,
        input: s.to_string(),
        detail: "missing ':' separator".to_string(),
    })?;

    validate_name(name, usage)?;

    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| Error::MalformedKey {
            usage,
            input: s.to_string(),
            detail: format!("base64 decode failed: {e}"),
        })?;

    if bytes.len() != expected_payload_length {
        return Err(Error::MalformedKey {
            usage,
            input: s.to_string(),
            detail: format!(
                "expected a {expected_payload_length} byte payload, got {}",
                bytes.len()
            ),
        });
    }

    Ok((name, bytes))
}
