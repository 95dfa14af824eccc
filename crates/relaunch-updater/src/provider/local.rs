//! Provider backed by a directory on the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{
    discard_partial, is_safe_relative, permission_bits, EntryKind, FileEntry, Provider, Visitor,
    VERSION_FILE_NAME,
};
use crate::error::UpdateError;
use crate::signature::relative_key;

/// Serves files from a release tree already present on disk.
///
/// The version is read from a `VERSION` file at the root of the tree.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<(), UpdateError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(UpdateError::ProviderUnavailable(format!(
                "directory {} does not exist",
                self.root.display()
            )))
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        self.ensure_root()?;
        info!("Opened local provider at {:?}", self.root);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpdateError> {
        Ok(())
    }

    async fn latest_version(&self) -> Result<String, UpdateError> {
        self.ensure_root()?;
        let path = self.root.join(VERSION_FILE_NAME);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpdateError::ProviderUnavailable(format!(
                    "{} has no {VERSION_FILE_NAME} file",
                    self.root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let version = content.trim();
        if version.is_empty() {
            return Err(UpdateError::ProviderUnavailable(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(version.to_string())
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        self.ensure_root()?;

        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            let file_entry = FileEntry::new(
                relative_key(&self.root, entry.path()),
                kind,
                permission_bits(&metadata),
            );
            visitor(&file_entry)?;
        }

        Ok(())
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        if !is_safe_relative(src) {
            return Err(UpdateError::FileNotFound(src.to_string()));
        }
        let full = self.root.join(src);
        match tokio::fs::metadata(&full).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Err(UpdateError::FileNotFound(src.to_string())),
        }

        debug!("Copying {:?} -> {:?}", full, dest);
        if let Err(e) = tokio::fs::copy(&full, dest).await {
            discard_partial(dest);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("VERSION"), "v1.0\n").unwrap();
        fs::create_dir(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/app"), b"binary").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_latest_version_trims() {
        let temp = create_tree();
        let provider = LocalProvider::new(temp.path());
        assert_eq!(provider.latest_version().await.unwrap(), "v1.0");
    }

    #[tokio::test]
    async fn test_missing_or_empty_version_unavailable() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path());
        assert!(matches!(
            provider.latest_version().await,
            Err(UpdateError::ProviderUnavailable(_))
        ));

        fs::write(temp.path().join("VERSION"), " \n").unwrap();
        assert!(matches!(
            provider.latest_version().await,
            Err(UpdateError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_unavailable() {
        let mut provider = LocalProvider::new("/nonexistent/relaunch/root");
        assert!(matches!(
            provider.open().await,
            Err(UpdateError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            provider.latest_version().await,
            Err(UpdateError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_walk_lists_files_and_directories() {
        let temp = create_tree();
        let provider = LocalProvider::new(temp.path());

        let mut seen = Vec::new();
        provider
            .walk(&mut |entry: &FileEntry| {
                seen.push((entry.path.clone(), entry.kind));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("VERSION".to_string(), EntryKind::File),
                ("bin".to_string(), EntryKind::Directory),
                ("bin/app".to_string(), EntryKind::File),
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieve_rejects_escape_and_directories() {
        let temp = create_tree();
        let out = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path().join("bin"));
        let dest = out.path().join("copy");

        for src in ["../VERSION", "missing", "."] {
            let result = provider.retrieve(src, &dest).await;
            assert!(matches!(result, Err(UpdateError::FileNotFound(_))), "{src}");
            assert!(!dest.exists());
        }

        provider.retrieve("app", &dest).await.unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"binary");
    }
}
