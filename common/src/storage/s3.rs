//! S3-compatible object storage.
//!
//! Credentials, region, and endpoint come from the standard AWS
//! environment variables. When a custom endpoint is configured
//! (`AWS_ENDPOINT_URL` / `AWS_ENDPOINT_URL_S3`), path-style addressing is
//! forced so MinIO-style stores work out of the box.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::Deserialize;

use super::{
    BackendKind, Download, NameStream, ObjectStat, StorageBackend, StorageError, StorageResult,
};

/// S3 storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// The bucket holding the cache.
    pub bucket: String,
    /// Key prefix under the bucket, if the cache does not live at the
    /// bucket root.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub async fn new(config: S3StorageConfig) -> anyhow::Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        let endpoint = pick_endpoint(
            std::env::var("AWS_ENDPOINT_URL").ok(),
            std::env::var("AWS_ENDPOINT_URL_S3").ok(),
        );
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn object_key(&self, name: &str) -> String {
        let name = name.trim_start_matches('/');
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }
}

/// The S3-specific endpoint variable wins over the generic one.
fn pick_endpoint(general: Option<String>, s3: Option<String>) -> Option<String> {
    s3.filter(|v| !v.is_empty())
        .or(general.filter(|v| !v.is_empty()))
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn open(&self, name: &str) -> StorageResult<Download> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(name))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    StorageError::NotFound(name.to_string())
                } else {
                    StorageError::io(service)
                }
            })?;

        Ok(Download::AsyncRead(Box::new(output.body.into_async_read())))
    }

    async fn stat(&self, name: &str) -> StorageResult<ObjectStat> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(name))
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_not_found() {
                    StorageError::NotFound(name.to_string())
                } else {
                    StorageError::io(service)
                }
            })?;

        Ok(ObjectStat {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            mtime: output
                .last_modified()
                .and_then(|dt| std::time::SystemTime::try_from(*dt).ok()),
        })
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        // No rename on object stores; a plain PUT in place, last writer
        // wins.
        tracing::debug!(name, "in-place PUT");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(name))
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|err| StorageError::io(err.into_service_error()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<NameStream> {
        use futures::StreamExt;

        let strip = {
            let prefix = self.prefix.trim_matches('/');
            if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            }
        };
        let pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.object_key(prefix))
            .into_paginator()
            .send();

        let stream = futures::stream::unfold(pages, |mut pages| async move {
            pages.next().await.map(|page| (page, pages))
        })
        .flat_map(move |page| {
            let items: Vec<_> = match page {
                Ok(output) => output.contents.unwrap_or_default().into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            };
            futures::stream::iter(items)
        });

        Ok(stream
            .map(move |item| match item {
                Ok(object) => {
                    let key = object.key().unwrap_or_default();
                    let name = key.strip_prefix(&strip).unwrap_or(key);
                    Ok(name.to_string())
                }
                Err(err) => Err(StorageError::Io(anyhow::Error::new(err))),
            })
            .boxed())
    }
}
