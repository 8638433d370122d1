//! Local filesystem storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{self, File};

use super::{
    BackendKind, Download, NameStream, ObjectStat, StorageBackend, StorageError, StorageResult,
};

/// Local file storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalStorageConfig {
    /// The directory all objects live under.
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(config: LocalStorageConfig) -> Self {
        Self { root: config.path }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn map_io_error(name: &str, error: std::io::Error) -> StorageError {
    match error.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::Permission(name.to_string()),
        _ => StorageError::io(error),
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn open(&self, name: &str) -> StorageResult<Download> {
        let file = File::open(self.object_path(name))
            .await
            .map_err(|e| map_io_error(name, e))?;
        Ok(Download::AsyncRead(Box::new(file)))
    }

    async fn stat(&self, name: &str) -> StorageResult<ObjectStat> {
        let meta = fs::metadata(self.object_path(name))
            .await
            .map_err(|e| map_io_error(name, e))?;
        Ok(ObjectStat {
            size: meta.len(),
            mtime: meta.modified().ok(),
        })
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.object_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(name, e))?;
        }

        // Write a `.new` sibling first, then rename over the target, so a
        // reader never observes a half-written object even on hardlinked
        // store directories.
        tracing::debug!(name, "atomic replace via staging file");
        let staging = sibling_new(&path);
        fs::write(&staging, bytes)
            .await
            .map_err(|e| map_io_error(name, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| map_io_error(name, e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<NameStream> {
        use futures::SinkExt;
        use futures::StreamExt;

        let root = self.root.clone();
        let start = if prefix.is_empty() {
            root.clone()
        } else {
            root.join(prefix)
        };

        let (mut tx, rx) = futures::channel::mpsc::channel::<StorageResult<String>>(64);
        tokio::spawn(async move {
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(error) => {
                        let name = dir.display().to_string();
                        let _ = tx.send(Err(map_io_error(&name, error))).await;
                        return;
                    }
                };
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => {
                            let path = entry.path();
                            let is_dir = entry
                                .file_type()
                                .await
                                .map(|t| t.is_dir())
                                .unwrap_or(false);
                            if is_dir {
                                pending.push(path);
                            } else if let Ok(relative) = path.strip_prefix(&root) {
                                let name = relative.to_string_lossy().replace('\\', "/");
                                if tx.send(Ok(name)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            let name = dir.display().to_string();
                            let _ = tx.send(Err(map_io_error(&name, error))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx.boxed())
    }
}

/// `foo/bar.narinfo` -> `foo/bar.narinfo.new`
fn sibling_new(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".new");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, backend) = backend();
        backend.write("sub/obj.narinfo", b"hello").await.unwrap();

        let bytes = backend
            .open("sub/obj.narinfo")
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");

        let stat = backend.stat("sub/obj.narinfo").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.mtime.is_some());
    }

    #[tokio::test]
    async fn test_write_leaves_no_staging_file() {
        let (dir, backend) = backend();
        backend.write("obj", b"first").await.unwrap();
        backend.write("obj", b"second").await.unwrap();

        assert!(!dir.path().join("obj.new").exists());
        let bytes = backend.open("obj").await.unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes, b"second");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_dir, backend) = backend();
        let err = backend.open("nope").await.err().unwrap();
        assert!(err.is_not_found());
        let err = backend.stat("nope").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list() {
        let (_dir, backend) = backend();
        backend.write("a.narinfo", b"a").await.unwrap();
        backend.write("nar/b.nar.xz", b"b").await.unwrap();
        backend.write("nix-cache-info", b"c").await.unwrap();

        let mut names: Vec<String> = backend
            .list("")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["a.narinfo", "nar/b.nar.xz", "nix-cache-info"]);

        let names: Vec<String> = backend
            .list("nar")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["nar/b.nar.xz"]);
    }
}
