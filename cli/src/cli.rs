use anyhow::{anyhow, Result};
use std::path::PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use enum_as_inner::EnumAsInner;

use common::storage::{
    HttpCacheBackend, HttpCacheConfig, LocalBackend, S3Backend, S3StorageConfig, StorageBackend,
};
use common::KeyStore;

use crate::command::fingerprint::{self, Fingerprint};
use crate::command::keygen::{self, Keygen};
use crate::command::list::{self, List};
use crate::command::sign::{self, Sign};
use crate::command::validate::{self, Validate};
use crate::command::verify::{self, Verify};

/// nixmirror - manage signatures on a Nix binary cache.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
pub struct Opts {
    #[clap(flatten)]
    pub keys: KeyOpts,

    #[clap(flatten)]
    pub backend: BackendOpts,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, EnumAsInner)]
pub enum Command {
    Sign(Sign),
    Verify(Verify),
    Validate(Validate),
    Fingerprint(Fingerprint),
    Keygen(Keygen),
    List(List),
}

/// Key material shared by all commands.
#[derive(Debug, clap::Args)]
pub struct KeyOpts {
    /// A public key in name:base64 form. Repeatable.
    #[clap(long = "public-key", global = true)]
    pub public_keys: Vec<String>,

    /// A file of public keys, one per line. Repeatable.
    #[clap(long = "public-key-file", global = true)]
    pub public_key_files: Vec<PathBuf>,

    /// A private key in name:base64 form. Repeatable.
    #[clap(long = "private-key", global = true)]
    pub private_keys: Vec<String>,

    /// A file of private keys, one per line. Repeatable.
    #[clap(long = "private-key-file", global = true)]
    pub private_key_files: Vec<PathBuf>,
}

impl KeyOpts {
    pub fn load(&self) -> Result<KeyStore> {
        let store = KeyStore::new();
        for path in &self.public_key_files {
            store.load_public_file(path)?;
        }
        for key in &self.public_keys {
            store.load_public(key)?;
        }
        for path in &self.private_key_files {
            store.load_private_file(path)?;
        }
        for key in &self.private_keys {
            store.load_private(key)?;
        }
        tracing::debug!(
            public_keys = store.public_count(),
            private_keys = store.private_count(),
            "Loaded keys"
        );
        Ok(store)
    }
}

/// Which object store the cache lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// A local directory.
    Local,
    /// An S3-compatible bucket (credentials from the environment).
    S3,
    /// An upstream HTTP binary cache (read-only).
    Http,
}

#[derive(Debug, clap::Args)]
pub struct BackendOpts {
    /// Storage backend for the binary cache.
    #[clap(long, value_enum, default_value_t = BackendChoice::Local, global = true)]
    pub backend: BackendChoice,

    /// Backend options: a root directory for `local`,
    /// `bucket[/prefix]` for `s3`, `url[,netrc-file=PATH]` for `http`.
    #[clap(long, default_value = "", global = true)]
    pub backend_opts: String,
}

impl BackendOpts {
    pub async fn build(&self) -> Result<Box<dyn StorageBackend>> {
        match self.backend {
            BackendChoice::Local => {
                let root = if self.backend_opts.is_empty() {
                    "."
                } else {
                    self.backend_opts.as_str()
                };
                Ok(Box::new(LocalBackend::with_root(root)))
            }
            BackendChoice::S3 => {
                let (bucket, prefix) = match self.backend_opts.split_once('/') {
                    Some((bucket, prefix)) => (bucket, prefix),
                    None => (self.backend_opts.as_str(), ""),
                };
                if bucket.is_empty() {
                    return Err(anyhow!("the s3 backend needs --backend-opts bucket[/prefix]"));
                }
                let backend = S3Backend::new(S3StorageConfig {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                })
                .await?;
                Ok(Box::new(backend))
            }
            BackendChoice::Http => {
                let config = parse_http_opts(&self.backend_opts)?;
                Ok(Box::new(HttpCacheBackend::new(config)?))
            }
        }
    }
}

/// Parses `url[,netrc-file=PATH]`.
fn parse_http_opts(opts: &str) -> Result<HttpCacheConfig> {
    let mut fields = opts.split(',').map(str::trim);
    let url = fields
        .next()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| anyhow!("the http backend needs --backend-opts url[,netrc-file=PATH]"))?;

    let mut netrc_file = None;
    for field in fields {
        match field.split_once('=') {
            Some(("netrc-file", value)) => netrc_file = Some(PathBuf::from(value)),
            _ => return Err(anyhow!("unknown http backend option: {field}")),
        }
    }

    Ok(HttpCacheConfig {
        url: url.to_string(),
        netrc_file,
    })
}

pub async fn run() -> Result<()> {
    let opts = Opts::parse();

    match opts.command {
        Command::Sign(_) => sign::run(opts).await,
        Command::Verify(_) => verify::run(opts).await,
        Command::Validate(_) => validate::run(opts).await,
        Command::Fingerprint(_) => fingerprint::run(opts).await,
        Command::Keygen(_) => keygen::run(opts).await,
        Command::List(_) => list::run(opts).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_opts() {
        let config = parse_http_opts("https://cache.nixos.org/").unwrap();
        assert_eq!(config.url, "https://cache.nixos.org/");
        assert!(config.netrc_file.is_none());

        let config =
            parse_http_opts("https://cache.example.org,netrc-file=/etc/netrc").unwrap();
        assert_eq!(config.netrc_file, Some(PathBuf::from("/etc/netrc")));

        assert!(parse_http_opts("").is_err());
        assert!(parse_http_opts("https://x,unknown=1").is_err());
    }

    #[test]
    fn test_command_line_shape() {
        let opts = Opts::try_parse_from([
            "nixmirror",
            "--private-key",
            "k:AA==",
            "verify",
            "--trusted-key",
            "cacheA",
            "a.narinfo",
        ])
        .unwrap();
        assert!(opts.command.as_verify().is_some());
        assert_eq!(opts.keys.private_keys, vec!["k:AA==".to_string()]);
    }
}
