//! Downloads of remote models and label files into the local cache directory.
//!
//! Files are cached by the last segment of the URL path. Acquisition of one
//! cache key is serialized, and a download only becomes visible under its
//! cache name once the whole body is on disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, Url,
};
use tempfile::TempPath;
use tracing::{debug, info};

use crate::{config::Config, error::AppError, store::plain_file_name};

/// A model or label file on local disk.
#[derive(Debug)]
pub enum Artifact {
    /// Stays on disk after the request, in the model store or the cache.
    Persistent(PathBuf),
    /// Removed from disk when dropped.
    Temporary(TempPath),
}

impl Artifact {
    pub fn path(&self) -> &Path {
        match self {
            Artifact::Persistent(path) => path.as_path(),
            Artifact::Temporary(path) => &**path,
        }
    }
}

pub struct RemoteFetcher {
    client: Client,
    cache_dir: PathBuf,
    use_cache: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RemoteFetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));
        if let Some(token) = &config.github_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("GITHUB_TOKEN is not a valid header value")?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .default_headers(headers)
            .build()
            .context("failed to build the download client")?;

        Ok(RemoteFetcher {
            client,
            cache_dir: config.cache_dir.clone(),
            use_cache: !config.no_cache,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolves `url` to a local file, downloading it unless a file with the
    /// same cache name is already present.
    pub async fn fetch(&self, url: &str) -> Result<Artifact, AppError> {
        let name = cache_name(url)?;

        if !self.use_cache {
            let tmp = self.download(url).await?;
            return Ok(Artifact::Temporary(tmp));
        }

        let lock = self.lock_for(&name);
        let result = {
            let _guard = lock.lock().await;
            self.fetch_cached(url, &name).await
        };
        self.release_lock(&name, lock);
        result
    }

    async fn fetch_cached(&self, url: &str, name: &str) -> Result<Artifact, AppError> {
        let path = self.cache_dir.join(name);
        if path.is_file() {
            debug!("Cache hit for {} at {:?}", url, path);
            return Ok(Artifact::Persistent(path));
        }

        let tmp = self.download(url).await?;
        tmp.persist(&path).map_err(|e| e.error)?;
        info!("Cached {} as {:?}", url, path);
        Ok(Artifact::Persistent(path))
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Drops the map entry for `name` once no other request holds or waits on
    /// it. Clones are only handed out under the map lock, so the count is
    /// stable while it is held.
    fn release_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn download(&self, url: &str) -> Result<TempPath, AppError> {
        info!("Downloading {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::remote(
                url,
                format!("server responded with {}", response.status()),
            ));
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let tmp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.cache_dir)?
            .into_temp_path();
        tokio::fs::write(&tmp, &bytes).await?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(tmp)
    }
}

/// File name a URL is cached under: the last non-empty path segment, with the
/// query string and fragment ignored. Distinct URLs that end in the same
/// segment share one cache entry.
pub fn cache_name(url: &str) -> Result<String, AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::client(format!("Invalid URL {:?}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::client(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| AppError::client(format!("Cannot derive a file name from {}", url)))?;
    Ok(plain_file_name(segment)?.to_string())
}
