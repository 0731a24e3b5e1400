//! Object storage adapter (§4.4): MinIO/S3 blob fetch with retry and
//! content hashing.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;

const MAX_FETCH_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    pub async fn from_env() -> Result<Self> {
        Self::from_config(&Config::from_env()).await
    }

    pub async fn from_config(cfg: &Config) -> Result<Self> {
        let protocol = if cfg.minio_use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, cfg.minio_endpoint, cfg.minio_port);

        info!("connecting to object store at {}", endpoint_url);

        let credentials = Credentials::new(
            cfg.minio_access_key.clone(),
            cfg.minio_secret_key.clone(),
            None,
            None,
            "minio",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self { client: Client::from_conf(config), bucket: cfg.minio_bucket.clone() })
    }

    /// Download a blob by key, retrying transient failures with capped
    /// exponential backoff.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download_once(key).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < MAX_FETCH_ATTEMPTS => {
                    let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                    warn!("download of {} failed (attempt {}): {}. retrying in {}ms", key, attempt, e, backoff);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to download {}", key))?;

        let data = response.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    pub async fn download_string(&self, key: &str) -> Result<String> {
        let bytes = self.download(key).await?;
        String::from_utf8(bytes).context("invalid UTF-8 content")
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.client.head_object().bucket(&self.bucket).key(key).send().await.is_ok()
    }
}

/// SHA-256 hex digest of a blob's content, used as a cache key for compiled
/// checker/validator binaries and attached to storage-fault log lines.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(b"hello world");
        let b = content_hash(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_hash_differs_on_change() {
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}
