use anyhow::{anyhow, Result};
use clap::Parser;

use common::NarInfo;

use crate::cli::Opts;
use super::{
    cancel_on_signal, check_cancelled, expand_paths, finish, one_line, read_bytes, report,
    write_back,
};

/// Re-sign manifests in place.
///
/// Existing signatures under the same key names are replaced when the
/// bytes differ; anything else is left alone.
#[derive(Debug, Parser)]
pub struct Sign {
    /// Names of private keys to sign with (`*` for all loaded keys).
    #[clap(long = "key", default_value = "*")]
    pub keys: Vec<String>,

    /// Keep a `.bak` copy of each rewritten manifest.
    #[clap(long)]
    pub backup: bool,

    /// Compute and report, but do not write anything back.
    #[clap(long)]
    pub dry_run: bool,

    /// Manifest paths; `-` reads additional paths from stdin.
    #[clap(required = true)]
    pub paths: Vec<String>,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_sign().unwrap();

    let store = opts.keys.load()?;
    let signers = store.select_privates(&sub.keys);
    if signers.is_empty() {
        return Err(anyhow!("no private keys selected"));
    }

    let backend = opts.backend.build().await?;
    let cancel = cancel_on_signal();
    let paths = expand_paths(&sub.paths).await?;

    let mut failures = 0;
    for path in &paths {
        check_cancelled(&cancel)?;

        let old_bytes = match read_bytes(&*backend, path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                report(path, "FAILREAD", &one_line(&err));
                failures += 1;
                continue;
            }
        };
        let mut info = match NarInfo::decode_bytes(&old_bytes) {
            Ok(info) => info,
            Err(err) => {
                report(path, "FAILREAD", &one_line(&err));
                failures += 1;
                continue;
            }
        };

        let mut updated = Vec::new();
        let mut sign_error = None;
        for key in &signers {
            match info.sign_replace_by_name(key) {
                Ok((true, signature)) => updated.push(signature.key_name().to_string()),
                Ok((false, _)) => {}
                Err(err) => {
                    sign_error = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = sign_error {
            report(path, "FAILMRSL", &one_line(&err));
            failures += 1;
            continue;
        }

        if updated.is_empty() {
            report(path, "NOCHANGE", "");
            continue;
        }

        if !sub.dry_run {
            let new_bytes = info.encode().into_bytes();
            if let Err(err) =
                write_back(&*backend, path, &old_bytes, &new_bytes, sub.backup).await
            {
                report(path, "FAILMRSL", &one_line(&err));
                failures += 1;
                continue;
            }
        }

        report(path, "SIGNUPDT", &updated.join(" "));
    }

    finish(failures, paths.len())
}
