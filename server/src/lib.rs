pub mod api;
pub mod config;
pub mod error;
pub mod listener;
pub mod trace;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use axum::{extract::Extension, Router};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use common::storage::{HttpCacheBackend, LocalBackend, S3Backend, StorageBackend};
use common::{KeyStore, PolicyRule, Resigner};

use crate::config::{Config, KeysConfig, StorageConfig};

/// Global server state.
#[derive(Debug)]
pub struct State {
    /// Handle to the storage backend serving the backing cache.
    storage: Arc<Box<dyn StorageBackend>>,
    /// The compiled resigning policy.
    resigner: Arc<Resigner>,
}
impl State {
    pub async fn new(config: &Config) -> Result<Arc<Self>> {
        let storage = match &config.storage {
            StorageConfig::Local(local_config) => {
                let local = LocalBackend::new(local_config.clone());
                let boxed: Box<dyn StorageBackend> = Box::new(local);
                Arc::new(boxed)
            }
            StorageConfig::S3(s3_config) => {
                let s3 = S3Backend::new(s3_config.clone()).await?;
                let boxed: Box<dyn StorageBackend> = Box::new(s3);
                Arc::new(boxed)
            }
            StorageConfig::Http(http_config) => {
                let http = HttpCacheBackend::new(http_config.clone())?;
                let boxed: Box<dyn StorageBackend> = Box::new(http);
                Arc::new(boxed)
            }
        };

        let keys = load_keys(&config.keys)?;
        let resigner = build_resigner(&keys, config)?;

        Ok(Arc::new(Self {
            storage,
            resigner: Arc::new(resigner),
        }))
    }

    /// Returns a handle to the storage backend.
    pub fn storage(&self) -> Arc<Box<dyn StorageBackend>> {
        Arc::clone(&self.storage)
    }

    /// Returns the compiled resigning policy.
    pub fn resigner(&self) -> Arc<Resigner> {
        Arc::clone(&self.resigner)
    }
}

/// Runs the gateway until the shutdown token fires.
pub async fn run_gateway(config: Config, shutdown: CancellationToken) -> Result<()> {
    tracing::info!("Starting resigning gateway...");

    let listen = config.listen.clone();
    let state = State::new(&config).await?;

    if state.resigner.is_empty() {
        tracing::warn!("No signing policy and no private keys; manifests pass through unchanged.");
    } else {
        tracing::info!(clauses = state.resigner.clause_count(), "Policy compiled");
    }

    let app = router(Arc::clone(&state));
    listener::serve_all(&listen, app, shutdown).await?;

    tracing::info!("Exiting");
    Ok(())
}

/// Builds the full middleware stack around the cache routes.
pub fn router(state: Arc<State>) -> Router {
    api::router()
        .layer(Extension(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::make_span)
                .on_response(trace::on_response),
        )
        .layer(CatchPanicLayer::new())
}

fn load_keys(config: &KeysConfig) -> Result<KeyStore> {
    let store = KeyStore::new();
    for path in &config.public_key_files {
        store
            .load_public_file(path)
            .with_context(|| format!("loading public keys from {}", path.display()))?;
    }
    for key in &config.public_keys {
        store.load_public(key)?;
    }
    for path in &config.private_key_files {
        store
            .load_private_file(path)
            .with_context(|| format!("loading private keys from {}", path.display()))?;
    }
    for key in &config.private_keys {
        store.load_private(key)?;
    }
    tracing::debug!(
        public_keys = store.public_count(),
        private_keys = store.private_count(),
        "Loaded keys"
    );
    Ok(store)
}

/// Merges file and inline policy rules, then compiles them.
///
/// File rules come first; an inline rule with the same `verify` specifier
/// replaces the file rule in place. With no rules at all, every loaded
/// private key is applied unconditionally.
fn build_resigner(keys: &KeyStore, config: &Config) -> Result<Resigner> {
    let mut rules: Vec<PolicyRule> = Vec::new();

    if let Some(path) = &config.policy_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("loading policy from {}", path.display()))?;
        rules = common::policy::parse_policy_file(&text)?;
    }
    for rule in &config.policy {
        match rules.iter_mut().find(|r| r.verify == rule.verify) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
    }

    if rules.is_empty() {
        if keys.private_count() == 0 && keys.public_count() == 0 {
            bail!("no keys and no policy configured; nothing to do");
        }
        return Ok(Resigner::unconditional(keys));
    }

    Ok(Resigner::compile(keys, &rules)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use common::storage::LocalStorageConfig;
    use common::NamedPrivateKey;

    fn local_config(dir: &std::path::Path) -> Config {
        toml::from_str(&format!(
            "[storage]\ntype = \"local\"\npath = \"{}\"\n",
            dir.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_requires_keys_or_policy() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        assert!(State::new(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_policy_keys_fail_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        let key = NamedPrivateKey::generate("mirror").unwrap();
        config.keys.private_keys.push(key.to_string());
        config.policy.push(PolicyRule {
            verify: "nobody".to_string(),
            sign: "mirror".to_string(),
        });

        let err = State::new(&config).await.unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }

    #[tokio::test]
    async fn test_inline_rule_overrides_file_rule() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = dir.path().join("policy");
        std::fs::write(&policy_path, "upstream=old\nother=mirror\n").unwrap();

        let keys = KeyStore::new();
        let upstream = NamedPrivateKey::generate("upstream").unwrap();
        keys.add_public(upstream.public_key());
        let other = NamedPrivateKey::generate("other").unwrap();
        keys.add_public(other.public_key());
        keys.add_private(NamedPrivateKey::generate("mirror").unwrap());

        let mut config = local_config(dir.path());
        config.policy_file = Some(policy_path);
        config.policy.push(PolicyRule {
            verify: "upstream".to_string(),
            sign: "mirror".to_string(),
        });

        // "old" is never loaded: the inline rule must have replaced the
        // file rule referencing it, or compilation fails.
        let resigner = build_resigner(&keys, &config).unwrap();
        assert_eq!(resigner.clause_count(), 2);
    }

    #[test]
    fn test_storage_config_variants() {
        let s3: StorageConfig =
            toml::from_str("type = \"s3\"\nbucket = \"cache\"\nprefix = \"mirror\"\n").unwrap();
        assert!(matches!(s3, StorageConfig::S3(_)));

        let http: StorageConfig =
            toml::from_str("type = \"http\"\nurl = \"https://cache.nixos.org/\"\n").unwrap();
        assert!(matches!(http, StorageConfig::Http(_)));
    }

    #[test]
    fn test_storage_config_local_variant() {
        let local: StorageConfig = toml::from_str("type = \"local\"\npath = \"/srv\"\n").unwrap();
        match local {
            StorageConfig::Local(LocalStorageConfig { path }) => {
                assert_eq!(path, std::path::PathBuf::from("/srv"))
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
