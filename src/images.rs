use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::fetcher::build_client;

/// Local storage for downloaded photos, addressed by a stable key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Public reference for `key` if a blob is already stored.
    async fn resolve(&self, key: &str) -> Option<String>;
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<String>;
}

/// Remote photo bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

// ── Filesystem blobs ──

/// Blobs as `<dir>/<key>.jpg`, served under `<url_prefix>/<key>.jpg`.
pub struct FsBlobStore {
    dir: PathBuf,
    url_prefix: String,
}

impl FsBlobStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn reference(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, file_name(key))
    }
}

/// The file name depends on the key alone; anything outside `[A-Za-z0-9_-]`
/// is dropped so a key can never escape the directory.
fn file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("{}.jpg", safe)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn resolve(&self, key: &str) -> Option<String> {
        let path = self.dir.join(file_name(key));
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(self.reference(key)),
            _ => None,
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create image directory {:?}", self.dir))?;

        let name = file_name(key);
        let path = self.dir.join(&name);
        let partial = self.dir.join(format!(".{}.part", name));

        // Write then rename, so readers never see half a file.
        tokio::fs::write(&partial, bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", partial))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move image into place at {:?}", path))?;

        Ok(self.reference(key))
    }
}

// ── HTTP download ──

pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(user_agent, timeout)?,
        })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            bail!("empty image body from {}", url);
        }
        Ok(bytes.to_vec())
    }
}

// ── Cache ──

/// Resolves remote photos to local references. Stored blobs are never
/// replaced or evicted, and a failed download yields the fallback reference.
pub struct ImageCache {
    source: Arc<dyn ImageSource>,
    blobs: Arc<dyn BlobStore>,
    fallback: String,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImageCache {
    pub fn new(source: Arc<dyn ImageSource>, blobs: Arc<dyn BlobStore>, fallback: &str) -> Self {
        Self {
            source,
            blobs,
            fallback: fallback.to_string(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub async fn resolve(&self, remote_url: Option<&str>, key: &str) -> String {
        // Same key: one caller downloads, the rest find the blob afterwards.
        let lock = self.key_lock(key);
        let reference = {
            let _guard = lock.lock().await;
            self.resolve_locked(remote_url, key).await
        };
        self.release(key, lock);
        reference
    }

    async fn resolve_locked(&self, remote_url: Option<&str>, key: &str) -> String {
        if let Some(existing) = self.blobs.resolve(key).await {
            debug!(key, "Image already cached");
            return existing;
        }

        let Some(url) = remote_url else {
            debug!(key, "No photo on listing, using fallback");
            return self.fallback.clone();
        };

        match self.fetch_and_store(url, key).await {
            Ok(reference) => {
                info!(key, "Saved image");
                reference
            }
            Err(e) => {
                warn!(key, %url, error = %e, "Image download failed, using fallback");
                self.fallback.clone()
            }
        }
    }

    async fn fetch_and_store(&self, url: &str, key: &str) -> Result<String> {
        let bytes = self.source.download(url).await?;
        self.blobs.write(key, &bytes).await
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string()).or_default().clone()
    }

    /// Forget the key's lock once the map holds the only other reference.
    fn release(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = map
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            map.remove(key);
        }
        // Drop our handle while the map is still locked so a concurrent
        // release sees the true count.
        drop(lock);
    }
}
