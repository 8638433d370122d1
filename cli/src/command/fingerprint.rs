use anyhow::Result;
use clap::Parser;

use common::NarInfo;

use crate::cli::Opts;
use super::{
    cancel_on_signal, check_cancelled, expand_paths, finish, one_line, read_bytes, report,
};

/// Print the signing fingerprint of each manifest.
#[derive(Debug, Parser)]
pub struct Fingerprint {
    /// Manifest paths; `-` reads additional paths from stdin.
    #[clap(required = true)]
    pub paths: Vec<String>,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_fingerprint().unwrap();

    let backend = opts.backend.build().await?;
    let cancel = cancel_on_signal();
    let paths = expand_paths(&sub.paths).await?;

    let mut failures = 0;
    for path in &paths {
        check_cancelled(&cancel)?;

        match read_bytes(&*backend, path)
            .await
            .map_err(common::Error::from)
            .and_then(|bytes| NarInfo::decode_bytes(&bytes))
        {
            Ok(info) => {
                let fingerprint = String::from_utf8_lossy(&info.fingerprint()).into_owned();
                println!("{path}:{fingerprint}");
            }
            Err(err) => {
                report(path, "FAILREAD", &one_line(&err));
                failures += 1;
            }
        }
    }

    finish(failures, paths.len())
}
