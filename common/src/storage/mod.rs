//! Object storage backends.
//!
//! Every backend exposes the same small contract over the objects of a
//! binary cache: streaming reads, metadata, whole-object writes, and
//! listing. Behavior that genuinely differs per backend family (path
//! normalization, atomic replace versus PUT-in-place) hangs off
//! [`BackendKind`] rather than being rediscovered at call sites.

pub mod http;
pub mod local;
pub mod s3;

use std::fmt;
use std::time::SystemTime;

use anyhow::Error as AnyError;
use async_trait::async_trait;
use displaydoc::Display;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

pub use http::{HttpCacheBackend, HttpCacheConfig};
pub use local::{LocalBackend, LocalStorageConfig};
pub use s3::{S3Backend, S3StorageConfig};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Which family of object store a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// A local filesystem directory.
    Local,
    /// An S3-compatible object store.
    S3,
    /// An upstream HTTP binary cache (read-only).
    HttpCache,
}

impl BackendKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::HttpCache => "http",
        }
    }
}

/// A storage error.
#[derive(Debug, Display)]
pub enum StorageError {
    /// Object not found: {0}
    NotFound(String),
    /// Permission denied: {0}
    Permission(String),
    /// The {0} backend is read-only
    ReadOnly(&'static str),
    /// The {0} backend cannot enumerate objects
    Unsupported(&'static str),
    /// I/O error: {0}
    Io(AnyError),
}

impl std::error::Error for StorageError {}

impl StorageError {
    pub(crate) fn io(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Io(AnyError::new(error))
    }

    /// True when the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

/// Way to read an object.
pub enum Download {
    AsyncRead(Box<dyn AsyncRead + Unpin + Send>),
}

impl Download {
    /// Reads the whole object into memory.
    pub async fn into_bytes(self) -> StorageResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let Download::AsyncRead(mut reader) = self;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(StorageError::io)?;
        Ok(bytes)
    }
}

/// A lazily-produced listing of object names.
pub type NameStream = BoxStream<'static, StorageResult<String>>;

#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// The backend family, for the few behaviors that branch on it.
    fn kind(&self) -> BackendKind;

    /// Opens an object for streaming reads.
    async fn open(&self, name: &str) -> StorageResult<Download>;

    /// Returns size and modification time of an object.
    async fn stat(&self, name: &str) -> StorageResult<ObjectStat>;

    /// Replaces an object with the given bytes.
    ///
    /// Filesystem backends replace atomically via a `.new` sibling and
    /// rename; object backends PUT in place (last writer wins).
    async fn write(&self, name: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Enumerates object names under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<NameStream>;
}

/// Adapts an output root to the backend family: object stores treat `.`
/// as the bucket root, the filesystem keeps it as the working directory.
pub fn normalize_root(kind: BackendKind, root: &str) -> String {
    match kind {
        BackendKind::Local => root.to_string(),
        BackendKind::S3 | BackendKind::HttpCache => {
            if root.is_empty() {
                "/".to_string()
            } else if let Some(rest) = root.strip_prefix('.') {
                format!("/{}", rest.trim_start_matches('/'))
            } else {
                root.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root(BackendKind::Local, "."), ".");
        assert_eq!(normalize_root(BackendKind::Local, "cache/dir"), "cache/dir");

        assert_eq!(normalize_root(BackendKind::S3, "."), "/");
        assert_eq!(normalize_root(BackendKind::S3, ""), "/");
        assert_eq!(normalize_root(BackendKind::S3, "./sub"), "/sub");
        assert_eq!(normalize_root(BackendKind::S3, "/already"), "/already");
    }
}
