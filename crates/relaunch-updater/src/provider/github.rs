//! Provider for releases published on GitHub.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use super::remote::{as_unavailable, DownloadedArchive};
use super::{Provider, Visitor};
use crate::download::Downloader;
use crate::error::UpdateError;

/// Default REST API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default host serving release assets.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com";

static REPOSITORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/([^/]+)/([^/]+?)(?:\.git)?/?$").expect("repository pattern is valid")
});

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Serves the files of the newest tagged release of a GitHub repository.
///
/// The newest release is the first tag the tags API returns. Its archive
/// is downloaded from
/// `https://github.com/{owner}/{repo}/releases/download/{tag}/{archive_name}`
/// and read as a zip or tarball depending on its suffix.
pub struct GithubProvider {
    repository_url: String,
    archive_name: String,
    api_base: String,
    download_base: String,
    downloader: OnceCell<Downloader>,
    archive: Option<DownloadedArchive>,
}

impl GithubProvider {
    /// `repository_url` looks like `github.com/owner/repo` (scheme optional).
    pub fn new(repository_url: impl Into<String>, archive_name: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            archive_name: archive_name.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            downloader: OnceCell::new(),
            archive: None,
        }
    }

    /// Use another API endpoint, e.g. a GitHub Enterprise server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_download_base(mut self, download_base: impl Into<String>) -> Self {
        self.download_base = download_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = OnceCell::from(downloader);
        self
    }

    /// Owner and repository name parsed from the repository URL.
    pub fn repository(&self) -> Result<(String, String), UpdateError> {
        let captures = REPOSITORY
            .captures(self.repository_url.trim())
            .ok_or_else(|| UpdateError::InvalidRepository(self.repository_url.clone()))?;
        Ok((captures[1].to_string(), captures[2].to_string()))
    }

    fn tags_url(&self) -> Result<String, UpdateError> {
        let (owner, name) = self.repository()?;
        Ok(format!("{}/repos/{}/{}/tags", self.api_base, owner, name))
    }

    /// Download URL of the configured archive for `tag`.
    pub fn archive_url(&self, tag: &str) -> Result<String, UpdateError> {
        let (owner, name) = self.repository()?;
        Ok(format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.download_base, owner, name, tag, self.archive_name
        ))
    }

    /// The configured downloader, or one with default settings.
    fn downloader(&self) -> Result<&Downloader, UpdateError> {
        self.downloader.get_or_try_init(Downloader::new)
    }

    fn archive(&self) -> Result<&dyn Provider, UpdateError> {
        self.archive
            .as_ref()
            .map(DownloadedArchive::provider)
            .ok_or(UpdateError::NotOpen)
    }
}

fn newest_tag(tags: Vec<Tag>, repository: &str) -> Result<String, UpdateError> {
    tags.into_iter().next().map(|tag| tag.name).ok_or_else(|| {
        UpdateError::ProviderUnavailable(format!("github repository {repository} has no tags"))
    })
}

#[async_trait]
impl Provider for GithubProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        let tag = self.latest_version().await?;
        let url = self.archive_url(&tag)?;
        info!("Downloading release {} from {}", tag, url);

        let archive = DownloadedArchive::fetch(self.downloader()?, &url, &self.archive_name).await?;
        if let Some(previous) = self.archive.replace(archive) {
            previous.close().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpdateError> {
        match self.archive.take() {
            Some(archive) => archive.close().await,
            None => Ok(()),
        }
    }

    async fn latest_version(&self) -> Result<String, UpdateError> {
        let url = self.tags_url()?;
        let tags: Vec<Tag> = self
            .downloader()?
            .fetch_json(&url)
            .await
            .map_err(|e| as_unavailable(&url, e))?;
        newest_tag(tags, &self.repository_url)
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        self.archive()?.walk(visitor).await
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        self.archive()?.retrieve(src, dest).await
    }
}
