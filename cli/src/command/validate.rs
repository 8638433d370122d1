use anyhow::Result;
use clap::Parser;

use common::NarInfo;

use crate::cli::Opts;
use super::{
    cancel_on_signal, check_cancelled, expand_paths, finish, one_line, read_bytes, report,
    write_back,
};

/// Check that manifests match their canonical serialization byte-exactly.
#[derive(Debug, Parser)]
pub struct Validate {
    /// Rewrite manifests that are not in canonical form.
    #[clap(long)]
    pub fix: bool,

    /// Keep a `.bak` copy of each rewritten manifest.
    #[clap(long)]
    pub backup: bool,

    /// Manifest paths; `-` reads additional paths from stdin.
    #[clap(required = true)]
    pub paths: Vec<String>,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_validate().unwrap();

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
        let info = match NarInfo::decode_bytes(&old_bytes) {
            Ok(info) => info,
            Err(err) => {
                report(path, "FAILREAD", &one_line(&err));
                failures += 1;
                continue;
            }
        };

        let canonical = info.encode().into_bytes();
        if canonical == old_bytes {
            report(path, "GOODFORM", "");
            continue;
        }

        if sub.fix {
            match write_back(&*backend, path, &old_bytes, &canonical, sub.backup).await {
                Ok(()) => report(path, "FIXEDFRM", "Updated On-Disk Format"),
                Err(err) => {
                    report(path, "FAILMRSL", &one_line(&err));
                    failures += 1;
                }
            }
        } else {
            report(path, "FAILFORM", "On-Disk Does Not Match Reserialization");
            failures += 1;
        }
    }

    finish(failures, paths.len())
}
