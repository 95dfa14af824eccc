//! Shared plumbing for providers that download a release archive.

use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use super::{decompress, Provider};
use crate::download::Downloader;
use crate::error::UpdateError;

/// A release archive downloaded into a private directory and opened.
pub(crate) struct DownloadedArchive {
    // Declared before the directory so it is closed before the files go away.
    provider: Box<dyn Provider>,
    _dir: TempDir,
}

impl DownloadedArchive {
    /// Download `url` as `archive_name` and open it with the matching reader.
    pub(crate) async fn fetch(
        downloader: &Downloader,
        url: &str,
        archive_name: &str,
    ) -> Result<Self, UpdateError> {
        let file_name = Path::new(archive_name)
            .file_name()
            .ok_or_else(|| UpdateError::UnsupportedFormat(archive_name.to_string()))?;

        let dir = tempfile::Builder::new().prefix("relaunch-release").tempdir()?;
        let path = dir.path().join(file_name);
        let mut provider = decompress(&path)?;

        downloader
            .download_to_file(url, &path)
            .await
            .map_err(|e| as_unavailable(url, e))?;
        provider.open().await?;
        debug!("Opened downloaded archive {:?}", path);

        Ok(Self {
            provider,
            _dir: dir,
        })
    }

    pub(crate) fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub(crate) async fn close(mut self) -> Result<(), UpdateError> {
        self.provider.close().await
    }
}

/// Report transport failures against a remote source as an unavailable provider.
pub(crate) fn as_unavailable(context: &str, err: UpdateError) -> UpdateError {
    match err {
        UpdateError::HttpError(_) | UpdateError::DownloadFailed { .. } | UpdateError::JsonError(_) => {
            UpdateError::ProviderUnavailable(format!("{context}: {err}"))
        }
        other => other,
    }
}
