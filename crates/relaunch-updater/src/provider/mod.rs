//! Content providers.
//!
//! A provider lists and fetches the files of one release from some backend:
//! a local directory, an archive, or a release hosted on GitHub or GitLab.
//! All variants share the [`Provider`] contract so the updater never needs to
//! know where the bits come from.
//!
//! ## Lifecycle
//!
//! `open` prepares the backend (opening an archive, downloading a release),
//! `walk` and `retrieve` operate on the opened content, and `close` releases
//! whatever `open` acquired. `latest_version` never requires `open`.

use std::fs::Metadata;
use std::path::{Component, Path};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::UpdateError;

mod decompress;
mod github;
mod gitlab;
mod gzip;
mod local;
mod remote;
mod secure;
mod zip_archive;

pub use decompress::decompress;
pub use github::GithubProvider;
pub use gitlab::GitlabProvider;
pub use gzip::GzipProvider;
pub use local::LocalProvider;
pub use secure::SecureProvider;
pub use zip_archive::ZipProvider;

/// Name of the file holding the release version in a local tree.
pub const VERSION_FILE_NAME: &str = "VERSION";

static ARCHIVE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"v[0-9]+\.[0-9]+\.[0-9]+").expect("version pattern is valid"));

/// Kind of an enumerated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One entry yielded by [`Provider::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the provider root, separated by `/`
    pub path: String,
    pub kind: EntryKind,
    /// Unix permission bits (`0o755` style)
    pub mode: u32,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, kind: EntryKind, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind,
            mode,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Visitor invoked once per entry by [`Provider::walk`].
///
/// Returning an error stops the walk; the error is handed back to the caller.
pub type Visitor<'a> = dyn FnMut(&FileEntry) -> Result<(), UpdateError> + Send + 'a;

/// Uniform access to the files of one release.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Prepare the backend for `walk` and `retrieve`.
    async fn open(&mut self) -> Result<(), UpdateError>;

    /// Release resources acquired by `open`. Safe to call when not open.
    async fn close(&mut self) -> Result<(), UpdateError>;

    /// Version string of the release this provider offers.
    async fn latest_version(&self) -> Result<String, UpdateError>;

    /// Enumerate every entry, stopping at the first visitor error.
    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError>;

    /// Copy the file at `src` to `dest`.
    ///
    /// On error `dest` is left absent.
    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError>;
}

/// Extract `vX.Y.Z` from an archive file name.
pub fn version_from_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    ARCHIVE_VERSION.find(&name).map(|m| m.as_str().to_string())
}

/// Version of an archive-backed provider, derived from its file name.
pub(crate) fn archive_version(path: &Path) -> Result<String, UpdateError> {
    if !path.is_file() {
        return Err(UpdateError::ProviderUnavailable(format!(
            "archive {} does not exist",
            path.display()
        )));
    }
    version_from_file_name(path).ok_or_else(|| {
        UpdateError::ProviderUnavailable(format!(
            "no version found in archive name {}",
            path.display()
        ))
    })
}

/// Reject member paths that are absolute or climb out of the root.
pub(crate) fn is_safe_relative(src: &str) -> bool {
    let path = Path::new(src);
    path.components().any(|c| matches!(c, Component::Normal(_)))
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Permission bits recorded for a filesystem entry.
pub(crate) fn permission_bits(metadata: &Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if metadata.is_dir() {
            0o755
        } else if metadata.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }
}

/// Remove a partially written destination, ignoring absence.
pub(crate) fn discard_partial(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial file {:?}: {}", dest, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_file_name() {
        assert_eq!(
            version_from_file_name(Path::new("/tmp/binaries-v1.2.3.zip")).as_deref(),
            Some("v1.2.3")
        );
        assert_eq!(
            version_from_file_name(Path::new("release_v10.0.42_linux.tar.gz")).as_deref(),
            Some("v10.0.42")
        );
        assert_eq!(version_from_file_name(Path::new("binaries.zip")), None);
        // only the file name is considered
        assert_eq!(version_from_file_name(Path::new("v1.0.0/binaries.zip")), None);
    }

    #[test]
    fn test_missing_archive_is_unavailable() {
        let err = archive_version(Path::new("doesnotexist-v1.0.0.zip")).unwrap_err();
        assert!(matches!(err, UpdateError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_is_safe_relative() {
        assert!(is_safe_relative("bin/app"));
        assert!(is_safe_relative("./VERSION"));
        assert!(!is_safe_relative("../etc/passwd"));
        assert!(!is_safe_relative("/etc/passwd"));
        assert!(!is_safe_relative(""));
        assert!(!is_safe_relative("."));
        assert!(!is_safe_relative("./."));
    }

    #[test]
    fn test_file_entry_name() {
        let entry = FileEntry::new("bin/app_linux_x86_64", EntryKind::File, 0o755);
        assert_eq!(entry.file_name(), "app_linux_x86_64");
        assert!(entry.is_file());
        assert!(!entry.is_dir());
        assert_eq!(FileEntry::new("app", EntryKind::File, 0).file_name(), "app");
    }
}
