//! Upstream HTTP binary cache storage.
//!
//! Read-only: objects are fetched with plain GET/HEAD requests against a
//! base URL, optionally authenticated with credentials from a netrc file.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio_util::io::StreamReader;

use super::{
    BackendKind, Download, NameStream, ObjectStat, StorageBackend, StorageError, StorageResult,
};

/// HTTP binary cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpCacheConfig {
    /// Base URL of the upstream cache, e.g. `https://cache.nixos.org/`.
    pub url: String,
    /// Optional netrc file supplying basic-auth credentials for the
    /// cache host.
    #[serde(default)]
    pub netrc_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct HttpCacheBackend {
    base: Url,
    client: Client,
    credentials: Option<(String, String)>,
}

impl HttpCacheBackend {
    pub fn new(config: HttpCacheConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.url)?;

        let credentials = match &config.netrc_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let host = base.host_str().unwrap_or_default();
                netrc_credentials(&text, host)
            }
            None => None,
        };

        Ok(Self {
            base,
            client: Client::builder().build()?,
            credentials,
        })
    }

    fn object_url(&self, name: &str) -> StorageResult<Url> {
        self.base
            .join(name.trim_start_matches('/'))
            .map_err(StorageError::io)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some((login, password)) = &self.credentials {
            builder = builder.basic_auth(login, Some(password));
        }
        builder
    }

    async fn send(&self, method: reqwest::Method, name: &str) -> StorageResult<reqwest::Response> {
        let url = self.object_url(name)?;
        let response = self
            .request(method, url)
            .send()
            .await
            .map_err(StorageError::io)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(name.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StorageError::Permission(name.to_string()))
            }
            _ => response
                .error_for_status()
                .map_err(StorageError::io),
        }
    }
}

#[async_trait]
impl StorageBackend for HttpCacheBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpCache
    }

    async fn open(&self, name: &str) -> StorageResult<Download> {
        let response = self.send(reqwest::Method::GET, name).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Download::AsyncRead(Box::new(StreamReader::new(stream))))
    }

    async fn stat(&self, name: &str) -> StorageResult<ObjectStat> {
        let response = self.send(reqwest::Method::HEAD, name).await?;
        let mtime = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        Ok(ObjectStat {
            size: response.content_length().unwrap_or(0),
            mtime,
        })
    }

    async fn write(&self, _name: &str, _bytes: &[u8]) -> StorageResult<()> {
        Err(StorageError::ReadOnly(self.kind().label()))
    }

    async fn list(&self, _prefix: &str) -> StorageResult<NameStream> {
        Err(StorageError::Unsupported(self.kind().label()))
    }
}

/// Extracts `login`/`password` for a machine from a netrc document.
///
/// Handles the token-stream form (`machine HOST login USER password PASS`,
/// possibly spread over lines) and a `default` fallback entry.
fn netrc_credentials(text: &str, host: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let mut selected: Option<usize> = None;
    let mut default: Option<usize> = None;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "machine" if tokens.get(i + 1) == Some(&host) => {
                selected = Some(i + 2);
                i += 2;
            }
            "default" => {
                default = Some(i + 1);
                i += 1;
            }
            _ => i += 1,
        }
    }

    let start = selected.or(default)?;
    let mut login = None;
    let mut password = None;
    let mut i = start;
    while i + 1 < tokens.len() && tokens[i] != "machine" && tokens[i] != "default" {
        match tokens[i] {
            "login" => login = Some(tokens[i + 1].to_string()),
            "password" => password = Some(tokens[i + 1].to_string()),
            _ => {}
        }
        i += 2;
    }

    Some((login?, password?))
}
