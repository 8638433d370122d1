//! In-memory collections of named keys.
//!
//! The store is loaded once at startup from explicit values and key files,
//! then shared read-mostly between batch loops or request handlers. A key
//! is never overwritten: loading the same bytes again under a new name adds
//! a second entry, and loading a known name with different bytes keeps both
//! entries selectable by that name.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::signing::{NamedPrivateKey, NamedPublicKey};

/// Shared store of named public and private keys.
#[derive(Debug, Default)]
pub struct KeyStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    public: Vec<NamedPublicKey>,
    private: Vec<NamedPrivateKey>,

    /// Public-key bytes to an index into `private`, for name-agnostic
    /// lookup of the signing half.
    by_public: HashMap<[u8; 32], usize>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an already-parsed public key, skipping exact duplicates.
    pub fn add_public(&self, key: NamedPublicKey) {
        let mut inner = self.inner.write().expect("key store lock poisoned");
        if !inner.public.contains(&key) {
            inner.public.push(key);
        }
    }

    /// Adds an already-parsed private key, skipping exact duplicates.
    pub fn add_private(&self, key: NamedPrivateKey) {
        let mut inner = self.inner.write().expect("key store lock poisoned");
        if !inner.private.contains(&key) {
            let index = inner.private.len();
            inner
                .by_public
                .entry(key.public_key().key_bytes())
                .or_insert(index);
            inner.private.push(key);
        }
    }

    /// Parses and adds a public key in `name:base64` form.
    pub fn load_public(&self, text: &str) -> Result<()> {
        self.add_public(text.parse()?);
        Ok(())
    }

    /// Parses and adds a private key in `name:base64` form.
    pub fn load_private(&self, text: &str) -> Result<()> {
        self.add_private(text.parse()?);
        Ok(())
    }

    /// Loads a public key file, one key per line. Returns the number of
    /// keys read.
    pub fn load_public_file(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::MalformedKey {
                usage: "public key file",
                input: path.display().to_string(),
                detail: e.to_string(),
            }
        })?;
        let mut count = 0;
        for line in commented_lines(&text) {
            self.load_public(&line)?;
            count += 1;
        }
        Ok(count)
    }

    /// Loads a private key file, one key per line. Returns the number of
    /// keys read.
    pub fn load_private_file(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::MalformedKey {
                usage: "private key file",
                input: path.display().to_string(),
                detail: e.to_string(),
            }
        })?;
        let mut count = 0;
        for line in commented_lines(&text) {
            self.load_private(&line)?;
            count += 1;
        }
        Ok(count)
    }

    /// All loaded public keys, in load order.
    pub fn publics(&self) -> Vec<NamedPublicKey> {
        self.inner
            .read()
            .expect("key store lock poisoned")
            .public
            .clone()
    }

    /// All loaded private keys, in load order.
    pub fn privates(&self) -> Vec<NamedPrivateKey> {
        self.inner
            .read()
            .expect("key store lock poisoned")
            .private
            .clone()
    }

    /// Public keys matching any of the given names. The name `*` selects
    /// every loaded key. A name mapped to several distinct keys selects
    /// all of them.
    pub fn select_publics<S: AsRef<str>>(&self, names: &[S]) -> Vec<NamedPublicKey> {
        let inner = self.inner.read().expect("key store lock poisoned");
        if names.iter().any(|n| n.as_ref() == "*") {
            return inner.public.clone();
        }
        inner
            .public
            .iter()
            .filter(|key| names.iter().any(|n| n.as_ref() == key.name()))
            .cloned()
            .collect()
    }

    /// Private keys matching any of the given names, `*` for all.
    pub fn select_privates<S: AsRef<str>>(&self, names: &[S]) -> Vec<NamedPrivateKey> {
        let inner = self.inner.read().expect("key store lock poisoned");
        if names.iter().any(|n| n.as_ref() == "*") {
            return inner.private.clone();
        }
        inner
            .private
            .iter()
            .filter(|key| names.iter().any(|n| n.as_ref() == key.name()))
            .cloned()
            .collect()
    }

    /// Looks up the private half of the given public key, regardless of
    /// the names either was loaded under.
    pub fn private_for_public(&self, key: &NamedPublicKey) -> Option<NamedPrivateKey> {
        let inner = self.inner.read().expect("key store lock poisoned");
        inner
            .by_public
            .get(&key.key_bytes())
            .map(|&i| inner.private[i].clone())
    }

    pub fn public_count(&self) -> usize {
        self.inner.read().expect("key store lock poisoned").public.len()
    }

    pub fn private_count(&self) -> usize {
        self.inner.read().expect("key store lock poisoned").private.len()
    }
}

/// Returns the bare content lines of a key-file-like document.
///
/// Blank lines and lines starting with `#` are skipped; a trailing ` #...`
/// or a tab-introduced `#...` comment is stripped.
pub(crate) fn commented_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for pattern in [" #", "\t#"] {
            if let Some(index) = line.find(pattern) {
                line = line[..index].trim_end();
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}
