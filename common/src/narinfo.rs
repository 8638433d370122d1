//! The narinfo manifest format.
//!
//! A narinfo file describes one store object in a binary cache: where its
//! NAR lives, its hashes and sizes, the store paths it references, and any
//! number of detached signatures. The format is line oriented
//! (`Key: value`, LF terminated) and must survive a decode/encode cycle
//! byte-exactly, because clients sign and verify a fingerprint derived
//! from its fields.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hash::TypedHash;
use crate::signing::{NamedPrivateKey, NamedPublicKey, Signature};

/// An in-memory narinfo manifest.
///
/// Unknown fields are preserved in their first-encountered order so that
/// manifests carrying extensions (`CA`, `System`, ...) re-emit stably.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarInfo {
    pub store_path: String,
    pub url: String,
    pub compression: String,
    pub file_hash: TypedHash,
    pub file_size: u64,
    pub nar_hash: TypedHash,
    pub nar_size: u64,
    pub references: Vec<String>,
    pub deriver: String,
    pub sigs: Vec<Signature>,

    /// Any fields we do not recognize, in insertion order.
    extra: Vec<(String, String)>,
}

impl NarInfo {
    /// Decodes a manifest from its textual form.
    ///
    /// Lines are split on the first `:`; whitespace around both halves is
    /// tolerated. A non-blank line without a colon fails the decode.
    pub fn decode(input: &str) -> Result<Self> {
        let mut info = NarInfo::default();

        for line in input.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (field, value) = line
                .split_once(':')
                .ok_or_else(|| Error::invalid_data(line))?;
            let field = field.trim();
            let value = value.trim();

            match field {
                "StorePath" => info.store_path = value.to_string(),
                "URL" => info.url = value.to_string(),
                "Compression" => info.compression = value.to_string(),
                "FileHash" => {
                    info.file_hash = value.parse().map_err(|_| Error::invalid_data(line))?
                }
                "FileSize" => {
                    info.file_size = value.parse().map_err(|_| Error::invalid_data(line))?
                }
                "NarHash" => {
                    info.nar_hash = value.parse().map_err(|_| Error::invalid_data(line))?
                }
                "NarSize" => {
                    info.nar_size = value.parse().map_err(|_| Error::invalid_data(line))?
                }
                "References" => {
                    if !value.is_empty() {
                        info.references = value.split(' ').map(str::to_string).collect();
                    }
                }
                "Deriver" => info.deriver = value.to_string(),
                "Sig" => {
                    // A single Sig line may carry several space-separated
                    // signatures, and several Sig lines may occur.
                    for sig in value.split(' ').filter(|s| !s.is_empty()) {
                        info.sigs.push(Signature::from_str(sig)?);
                    }
                }
                _ => match info.extra.iter_mut().find(|(k, _)| k == field) {
                    Some((_, existing)) => *existing = value.to_string(),
                    None => info.extra.push((field.to_string(), value.to_string())),
                },
            }
        }

        Ok(info)
    }

    /// Decodes a manifest from raw bytes.
    pub fn decode_bytes(input: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(input)
            .map_err(|_| Error::invalid_data("manifest is not valid UTF-8"))?;
        Self::decode(text)
    }

    /// Encodes the manifest back to its textual form.
    ///
    /// Fields are emitted in the canonical order, one `Sig` line per
    /// signature, then any unknown fields in the order they were first
    /// seen. An empty reference list emits as `References: ` with the
    /// trailing space kept; the upstream cache emits the same, and the
    /// distinction feeds into the signed fingerprint.
    pub fn encode(&self) -> String {
        let mut out = String::new();

        push_field(&mut out, "StorePath", &self.store_path);
        push_field(&mut out, "URL", &self.url);
        if !self.compression.is_empty() {
            push_field(&mut out, "Compression", &self.compression);
        }
        push_field(&mut out, "FileHash", &self.file_hash.to_string());
        push_field(&mut out, "FileSize", &self.file_size.to_string());
        push_field(&mut out, "NarHash", &self.nar_hash.to_string());
        push_field(&mut out, "NarSize", &self.nar_size.to_string());
        push_field(&mut out, "References", &self.references.join(" "));
        if !self.deriver.is_empty() {
            push_field(&mut out, "Deriver", &self.deriver);
        }
        for sig in &self.sigs {
            push_field(&mut out, "Sig", &sig.to_string());
        }
        for (field, value) in &self.extra {
            push_field(&mut out, field, value);
        }

        out
    }

    /// Returns the fingerprint which is signed/verified by a signature.
    ///
    /// References are absolutized against the store directory of the
    /// manifest's own store path and joined with commas; an empty list
    /// contributes an empty final segment.
    pub fn fingerprint(&self) -> Vec<u8> {
        let store_dir = match self.store_path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => ".",
        };
        let references = self
            .references
            .iter()
            .map(|r| format!("{store_dir}/{r}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "1;{};{};{};{}",
            self.store_path, self.nar_hash, self.nar_size, references
        )
        .into_bytes()
    }

    /// Verifies the manifest against the given key and returns the
    /// matching signatures.
    pub fn verify(&self, key: &NamedPublicKey) -> (bool, Vec<Signature>) {
        let fingerprint = self.fingerprint();
        let matches: Vec<Signature> = self
            .sigs
            .iter()
            .filter(|sig| key.verify_fingerprint(&fingerprint, sig))
            .cloned()
            .collect();
        (!matches.is_empty(), matches)
    }

    /// Generates but does not apply a signature for this manifest.
    pub fn make_signature(&self, key: &NamedPrivateKey) -> Result<Signature> {
        key.sign_fingerprint(&self.fingerprint())
    }

    /// Generates and applies a new signature.
    ///
    /// An existing signature with the same name and bytes is left alone
    /// and `added` is false; otherwise the new signature is appended.
    pub fn sign(&mut self, key: &NamedPrivateKey) -> Result<(bool, Signature)> {
        let signature = self.make_signature(key)?;
        if self.sigs.contains(&signature) {
            return Ok((false, signature));
        }
        self.sigs.push(signature.clone());
        Ok((true, signature))
    }

    /// Like [`NarInfo::sign`], but an existing signature under the same
    /// name with different bytes is dropped (all of them) before the new
    /// signature is appended.
    pub fn sign_replace_by_name(&mut self, key: &NamedPrivateKey) -> Result<(bool, Signature)> {
        let signature = self.make_signature(key)?;
        let conflicting = self
            .sigs
            .iter()
            .any(|s| s.key_name() == signature.key_name() && s != &signature);
        if conflicting {
            self.remove_sigs_by_names(&[signature.key_name()]);
            self.sigs.push(signature.clone());
            return Ok((true, signature));
        }
        if self.sigs.contains(&signature) {
            return Ok((false, signature));
        }
        self.sigs.push(signature.clone());
        Ok((true, signature))
    }

    /// Removes every signature whose key name is in the given set.
    pub fn remove_sigs_by_names<S: AsRef<str>>(&mut self, names: &[S]) {
        self.sigs
            .retain(|sig| !names.iter().any(|n| n.as_ref() == sig.key_name()));
    }

    /// Unknown fields carried by the manifest, in insertion order.
    pub fn extra_fields(&self) -> &[(String, String)] {
        &self.extra
    }
}

fn push_field(out: &mut String, field: &str, value: &str) {
    out.push_str(field);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}
