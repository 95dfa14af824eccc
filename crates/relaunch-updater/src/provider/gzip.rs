//! Provider backed by a `.tar.gz` archive.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::info;

use super::{archive_version, LocalProvider, Provider, Visitor};
use crate::error::UpdateError;

/// Serves the members of a gzip-compressed tarball.
///
/// Opening extracts the whole archive into a private temporary directory;
/// walking and retrieving then work on that copy. Closing removes it.
pub struct GzipProvider {
    path: PathBuf,
    extracted: Option<Extracted>,
}

struct Extracted {
    // Held for its Drop, which removes the extracted tree.
    _dir: TempDir,
    local: LocalProvider,
}

impl GzipProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extracted: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn local(&self) -> Result<&LocalProvider, UpdateError> {
        self.extracted
            .as_ref()
            .map(|e| &e.local)
            .ok_or(UpdateError::NotOpen)
    }
}

/// Unpack `archive` into `target`.
fn unpack(archive: &Path, target: &Path) -> Result<(), UpdateError> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.set_preserve_permissions(true);
    tarball.unpack(target).map_err(|e| {
        UpdateError::Archive(format!("failed to extract {}: {}", archive.display(), e))
    })
}

#[async_trait]
impl Provider for GzipProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        if !self.path.is_file() {
            return Err(UpdateError::ProviderUnavailable(format!(
                "archive {} does not exist",
                self.path.display()
            )));
        }

        let dir = tempfile::Builder::new().prefix("relaunch-tgz").tempdir()?;
        let archive = self.path.clone();
        let target = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack(&archive, &target))
            .await
            .map_err(|e| UpdateError::Archive(format!("extraction task failed: {e}")))??;

        info!("Extracted {:?} into {:?}", self.path, dir.path());
        let local = LocalProvider::new(dir.path());
        self.extracted = Some(Extracted { _dir: dir, local });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpdateError> {
        self.extracted = None;
        Ok(())
    }

    async fn latest_version(&self) -> Result<String, UpdateError> {
        archive_version(&self.path)
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        self.local()?.walk(visitor).await
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        self.local()?.retrieve(src, dest).await
    }
}
