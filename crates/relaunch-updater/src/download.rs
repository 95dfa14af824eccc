//! HTTP downloads for remote release providers.
//!
//! Handles JSON lookups against release APIs and streaming archive
//! downloads with optional progress reporting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::UpdateError;

/// Progress callback type for download progress reporting.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// HTTP client wrapper with timeouts and a user agent.
///
/// Release APIs such as GitHub's reject requests without a user agent, so
/// every request carries the configured one.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    config: NetworkConfig,
    progress_callback: Option<ProgressCallback>,
}

impl Downloader {
    /// Create a downloader with default network settings.
    pub fn new() -> Result<Self, UpdateError> {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a downloader with custom network settings.
    ///
    /// Fails when the client cannot honor the settings, e.g. a user agent
    /// that is not a valid header value.
    pub fn with_config(config: NetworkConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UpdateError::ConfigError(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            progress_callback: None,
        })
    }

    /// Set the progress callback.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    /// Clear the progress callback.
    pub fn clear_progress_callback(&mut self) {
        self.progress_callback = None;
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Fetch a URL into memory.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, UpdateError> {
        debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(UpdateError::DownloadFailed {
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Fetch a URL and decode the body as JSON.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpdateError> {
        let body = self.fetch(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Stream a URL to `dest`, returning the number of bytes written.
    ///
    /// A failed download removes whatever was written.
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, UpdateError> {
        info!("Starting download: {} -> {:?}", url, dest);

        let result = self.stream_to_file(url, dest).await;
        match &result {
            Ok(written) => info!("Download complete: {} bytes", written),
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                let _ = tokio::fs::remove_file(dest).await;
            }
        }
        result
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<u64, UpdateError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        self.report_progress(downloaded, total);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.report_progress(downloaded, total);
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }

    fn report_progress(&self, downloaded: u64, total: Option<u64>) {
        if let Some(callback) = &self.progress_callback {
            callback(DownloadProgress { downloaded, total });
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// Download progress information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Total bytes, when the server announced a length.
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn new(downloaded: u64, total: Option<u64>) -> Self {
        Self { downloaded, total }
    }

    /// Download progress as a percentage (0.0 to 100.0), if the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded as f64 / total as f64) * 100.0),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if total > 0 && self.downloaded >= total)
    }
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.total, self.percentage()) {
            (Some(total), Some(pct)) => {
                write!(f, "{}/{} bytes ({:.1}%)", self.downloaded, total, pct)
            }
            _ => write!(f, "{} bytes", self.downloaded),
        }
    }
}
