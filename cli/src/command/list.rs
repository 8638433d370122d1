use anyhow::Result;
use clap::Parser;
use futures::TryStreamExt;

use crate::cli::Opts;

/// List the manifests of the cache.
#[derive(Debug, Parser)]
pub struct List {
    /// Only list objects under this prefix.
    #[clap(long, default_value = "")]
    pub prefix: String,

    /// List every object instead of only `*.narinfo` manifests.
    #[clap(long)]
    pub all: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_list().unwrap();

    let backend = opts.backend.build().await?;
    let mut names = backend.list(&sub.prefix).await?;

    while let Some(name) = names.try_next().await? {
        if sub.all || name.ends_with(".narinfo") {
            println!("{name}");
        }
    }

    Ok(())
}
