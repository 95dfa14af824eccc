//! Provider for releases published on GitLab.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::info;

use super::remote::{as_unavailable, DownloadedArchive};
use super::{Provider, Visitor};
use crate::download::Downloader;
use crate::error::UpdateError;

/// Default REST API endpoint.
pub const DEFAULT_API_BASE: &str = "https://gitlab.com/api/v4";

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: ReleaseAssets,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseAssets {
    #[serde(default)]
    links: Vec<ReleaseLink>,
}

#[derive(Debug, Deserialize)]
struct ReleaseLink {
    name: String,
    #[serde(default)]
    direct_asset_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl Release {
    /// Download URL of the asset link whose name ends with `archive_name`.
    fn asset_url(&self, archive_name: &str) -> Option<&str> {
        self.assets
            .links
            .iter()
            .find(|link| link.name.ends_with(archive_name))
            .and_then(|link| link.direct_asset_url.as_deref().or(link.url.as_deref()))
    }
}

/// Serves the files of the newest release of a GitLab project.
///
/// The newest release is the first entry of the project's releases API; the
/// archive is the release asset link whose name ends with `archive_name`.
pub struct GitlabProvider {
    project_id: u64,
    archive_name: String,
    api_base: String,
    downloader: OnceCell<Downloader>,
    archive: Option<DownloadedArchive>,
}

impl GitlabProvider {
    pub fn new(project_id: u64, archive_name: impl Into<String>) -> Self {
        Self {
            project_id,
            archive_name: archive_name.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            downloader: OnceCell::new(),
            archive: None,
        }
    }

    /// Use a self-hosted instance, e.g. `https://gitlab.example.com/api/v4`.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = OnceCell::from(downloader);
        self
    }

    fn releases_url(&self) -> String {
        format!("{}/projects/{}/releases", self.api_base, self.project_id)
    }

    async fn latest_release(&self) -> Result<Release, UpdateError> {
        let url = self.releases_url();
        let releases: Vec<Release> = self
            .downloader()?
            .fetch_json(&url)
            .await
            .map_err(|e| as_unavailable(&url, e))?;
        releases.into_iter().next().ok_or_else(|| {
            UpdateError::ProviderUnavailable(format!(
                "gitlab project {} has no releases",
                self.project_id
            ))
        })
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

#[async_trait]
impl Provider for GitlabProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        let release = self.latest_release().await?;
        let url = release.asset_url(&self.archive_name).ok_or_else(|| {
            UpdateError::FileNotFound(format!(
                "release {} has no asset named {}",
                release.tag_name, self.archive_name
            ))
        })?;
        info!("Downloading release {} from {}", release.tag_name, url);

        let archive = DownloadedArchive::fetch(self.downloader()?, url, &self.archive_name).await?;
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
        Ok(self.latest_release().await?.tag_name)
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        self.archive()?.walk(visitor).await
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        self.archive()?.retrieve(src, dest).await
    }
}
