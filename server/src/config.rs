use anyhow::Result;
use std::path::{Path, PathBuf};
use serde::Deserialize;

use common::storage::{HttpCacheConfig, LocalStorageConfig, S3StorageConfig};
use common::PolicyRule;

use crate::listener::ListenAddr;

pub async fn load(path: &Path) -> Result<Config> {
    let data = tokio::fs::read_to_string(path).await?;
    let config = toml::from_str(&data)?;
    Ok(config)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener specifiers, e.g. `tcp://127.0.0.1:8080` or
    /// `unix:///run/nixmirror.sock`.
    #[serde(default = "default_listen")]
    pub listen: Vec<ListenAddr>,

    /// Storage serving the backing cache.
    pub storage: StorageConfig,

    /// Key material available to the resigner.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Resigning rules, applied in order. When both `policy_file` and
    /// inline rules are given, the file rules come first and an inline
    /// rule with the same `verify` specifier replaces the file's.
    #[serde(default)]
    pub policy: Vec<PolicyRule>,

    /// External rules file, one `pubspec=privspec` per line.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Local file storage.
    #[serde(rename = "local")]
    Local(LocalStorageConfig),
    /// S3-compatible object storage.
    #[serde(rename = "s3")]
    S3(S3StorageConfig),
    /// An upstream HTTP binary cache.
    #[serde(rename = "http")]
    Http(HttpCacheConfig),
}

/// Key material, inline and/or from key files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysConfig {
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default)]
    pub public_key_files: Vec<PathBuf>,
    #[serde(default)]
    pub private_keys: Vec<String>,
    #[serde(default)]
    pub private_key_files: Vec<PathBuf>,
}

fn default_listen() -> Vec<ListenAddr> {
    vec![ListenAddr::Tcp("127.0.0.1:8080".parse().unwrap())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
listen = ["tcp://0.0.0.0:8080", "unix:///run/mirror.sock"]

[storage]
type = "local"
path = "/srv/cache"

[keys]
public_keys = ["cache.nixos.org-1:6NCHdD59X431o0gWypbMrAURkbJ16ZPMQFGspcDShjY="]
private_key_files = ["/etc/nixmirror/mirror.key"]

[[policy]]
verify = "cache.nixos.org-1"
sign = "mirror-1"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.listen.len(), 2);
        assert!(matches!(config.storage, StorageConfig::Local(_)));
        assert_eq!(config.policy.len(), 1);
        assert_eq!(config.policy[0].verify, "cache.nixos.org-1");
    }

    #[test]
    fn test_defaults() {
        let text = "[storage]\ntype = \"local\"\npath = \"/srv/cache\"\n";
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.listen, default_listen());
        assert!(config.policy.is_empty());
        assert!(config.policy_file.is_none());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let text = "[storage]\ntype = \"local\"\npath = \"/x\"\nnot_a_field = 1\n";
        assert!(toml::from_str::<Config>(text).is_err());
    }
}
