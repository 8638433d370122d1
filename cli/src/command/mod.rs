pub mod fingerprint;
pub mod keygen;
pub mod list;
pub mod sign;
pub mod validate;
pub mod verify;

use anyhow::{anyhow, Result};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use common::storage::StorageBackend;
use common::Error;

/// One result line per input, consumed by scripts:
/// `<path>:<CODE>:<detail>`.
pub(crate) fn report(path: &str, code: &str, detail: &str) {
    println!("{path}:{code}:{detail}");
}

/// Expands a path list: `-` pulls additional paths, one per line, from
/// stdin. The stdin paths come last, in input order.
pub(crate) async fn expand_paths(paths: &[String]) -> Result<Vec<String>> {
    let mut expanded: Vec<String> = paths.iter().filter(|p| *p != "-").cloned().collect();

    if paths.iter().any(|p| p == "-") {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if !line.is_empty() {
                expanded.push(line.to_string());
            }
        }
    }

    Ok(expanded)
}

/// A token cancelled by the first Ctrl-C, checked between batch items.
pub(crate) fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signalled.cancel();
        }
    });
    token
}

/// Fails the whole command once every item has been attempted.
pub(crate) fn finish(failures: usize, total: usize) -> Result<()> {
    if failures > 0 {
        Err(anyhow!("{failures} of {total} paths failed"))
    } else {
        Ok(())
    }
}

pub(crate) fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled.into())
    } else {
        Ok(())
    }
}

pub(crate) async fn read_bytes(
    backend: &dyn StorageBackend,
    name: &str,
) -> std::result::Result<Vec<u8>, common::storage::StorageError> {
    backend.open(name).await?.into_bytes().await
}

/// Writes a manifest back, optionally keeping a `.bak` copy of the old
/// bytes beside it. Atomicity is the backend's concern.
pub(crate) async fn write_back(
    backend: &dyn StorageBackend,
    name: &str,
    old_bytes: &[u8],
    new_bytes: &[u8],
    backup: bool,
) -> std::result::Result<(), common::storage::StorageError> {
    if backup {
        backend.write(&format!("{name}.bak"), old_bytes).await?;
    }
    backend.write(name, new_bytes).await
}

/// The path of a manifest's NAR, resolved beside the manifest.
pub(crate) fn sibling_path(manifest_name: &str, url: &str) -> String {
    match manifest_name.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{url}"),
        None => url.to_string(),
    }
}

/// Flattens an error chain into one report-friendly line.
pub(crate) fn one_line(err: &dyn std::fmt::Display) -> String {
    err.to_string().replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path("foo.narinfo", "nar/x.nar.xz"),
            "nar/x.nar.xz"
        );
        assert_eq!(
            sibling_path("mirror/foo.narinfo", "nar/x.nar.xz"),
            "mirror/nar/x.nar.xz"
        );
    }

    #[tokio::test]
    async fn test_expand_paths_without_stdin() {
        let paths = vec!["a".to_string(), "b".to_string()];
        assert_eq!(expand_paths(&paths).await.unwrap(), paths);
    }

    #[test]
    fn test_finish() {
        assert!(finish(0, 3).is_ok());
        assert!(finish(1, 3).is_err());
    }
}
