use anyhow::{anyhow, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use common::storage::{Download, StorageBackend};
use common::{Error, NamedPublicKey, NarInfo};

use crate::cli::Opts;
use super::{
    cancel_on_signal, check_cancelled, expand_paths, finish, one_line, read_bytes, report,
    sibling_path,
};

/// Verify manifest signatures against trusted keys.
#[derive(Debug, Parser)]
pub struct Verify {
    /// Names of keys to trust (`*` for all loaded public keys).
    #[clap(long = "trusted-key", default_value = "*")]
    pub trusted_keys: Vec<String>,

    /// Also trust the public halves of loaded private keys.
    #[clap(long)]
    pub include_private_keys: bool,

    /// Re-hash the referenced NAR file against the manifest's FileHash.
    #[clap(long)]
    pub validate_hashes: bool,

    /// Manifest paths; `-` reads additional paths from stdin.
    #[clap(required = true)]
    pub paths: Vec<String>,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_verify().unwrap();

    let store = opts.keys.load()?;
    if sub.include_private_keys {
        for key in store.privates() {
            store.add_public(key.public_key());
        }
    }
    let trusted = store.select_publics(&sub.trusted_keys);
    if trusted.is_empty() {
        return Err(anyhow!("no public keys selected"));
    }

    let backend = opts.backend.build().await?;
    let cancel = cancel_on_signal();
    let paths = expand_paths(&sub.paths).await?;

    let mut failures = 0;
    for path in &paths {
        check_cancelled(&cancel)?;

        let info = match read_bytes(&*backend, path)
            .await
            .map_err(Error::from)
            .and_then(|bytes| NarInfo::decode_bytes(&bytes))
        {
            Ok(info) => info,
            Err(err) => {
                report(path, "FAILREAD", &one_line(&err));
                failures += 1;
                continue;
            }
        };

        let matched: Vec<&NamedPublicKey> = trusted
            .iter()
            .filter(|key| info.verify(key).0)
            .collect();
        let matched_names = matched
            .iter()
            .map(|key| key.name())
            .collect::<Vec<_>>()
            .join(" ");

        if matched.is_empty() {
            report(path, "FAILSIGN", "");
            failures += 1;
            continue;
        }

        if sub.validate_hashes {
            match check_file_hash(&*backend, path, &info).await {
                Ok(true) => report(path, "GOODHASH", &matched_names),
                Ok(false) => {
                    report(path, "FAILHASH", &matched_names);
                    failures += 1;
                }
                Err(err) => {
                    report(path, "FAILHASH", &one_line(&err));
                    failures += 1;
                }
            }
        } else {
            report(path, "GOODSIGN", &matched_names);
        }
    }

    finish(failures, paths.len())
}

/// Streams the manifest's NAR file and compares its sha256 against
/// `FileHash`. Only sha256 manifests can be re-hashed.
async fn check_file_hash(
    backend: &dyn StorageBackend,
    manifest_name: &str,
    info: &NarInfo,
) -> Result<bool> {
    if info.file_hash.algo != "sha256" {
        return Err(Error::UnsupportedHash(info.file_hash.algo.clone()).into());
    }

    let nar_path = sibling_path(manifest_name, &info.url);
    let Download::AsyncRead(mut reader) = backend.open(&nar_path).await.map_err(Error::from)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().as_slice() == info.file_hash.bytes.as_slice())
}
