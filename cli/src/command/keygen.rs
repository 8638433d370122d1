use anyhow::Result;
use clap::Parser;

use common::storage::normalize_root;
use common::NamedPrivateKey;

use crate::cli::Opts;

/// Generate a new signing keypair.
#[derive(Debug, Parser)]
pub struct Keygen {
    /// Name embedded in the generated keys.
    #[clap(long)]
    pub name: String,

    /// Where to write the key files.
    #[clap(long, default_value = ".")]
    pub output_dir: String,

    /// Private key file extension.
    #[clap(long, default_value = "key")]
    pub private_ext: String,

    /// Public key file extension.
    #[clap(long, default_value = "pub")]
    pub public_ext: String,

    /// Do not emit a file for the public key.
    #[clap(long)]
    pub no_public_file: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let sub = opts.command.as_keygen().unwrap();

    let backend = opts.backend.build().await?;
    let output_dir = normalize_root(backend.kind(), &sub.output_dir);
    let output_dir = output_dir.trim_end_matches('/');

    let private = NamedPrivateKey::generate(&sub.name)?;
    let public = private.public_key();

    let private_file = format!("{output_dir}/{}.{}", sub.name, sub.private_ext);
    backend
        .write(&private_file, format!("{private}\n").as_bytes())
        .await?;
    tracing::debug!(path = %private_file, "Wrote private key");

    if !sub.no_public_file {
        let public_file = format!("{output_dir}/{}.{}", sub.name, sub.public_ext);
        backend
            .write(&public_file, format!("{public}\n").as_bytes())
            .await?;
        tracing::debug!(path = %public_file, "Wrote public key");
    }

    println!("{public}");
    Ok(())
}
