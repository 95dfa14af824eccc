//! Provider backed by a `.zip` archive.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{
    archive_version, discard_partial, is_safe_relative, EntryKind, FileEntry, Provider, Visitor,
};
use crate::error::UpdateError;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Serves the members of a zip archive without extracting it up front.
///
/// The version comes from the archive's file name (`release-v1.2.3.zip`).
pub struct ZipProvider {
    path: PathBuf,
    state: Option<OpenArchive>,
}

struct OpenArchive {
    archive: Mutex<ZipArchive<File>>,
    entries: Vec<FileEntry>,
}

impl ZipProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> Result<&OpenArchive, UpdateError> {
        self.state.as_ref().ok_or(UpdateError::NotOpen)
    }
}

fn index_entries(archive: &mut ZipArchive<File>) -> Result<Vec<FileEntry>, UpdateError> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let name = file.name().trim_end_matches('/').to_string();
        if !is_safe_relative(&name) {
            warn!("Ignoring zip member with unsafe path {:?}", file.name());
            continue;
        }

        let unix_mode = file.unix_mode();
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else if unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };
        let mode = match (unix_mode, kind) {
            (Some(m), _) => m & 0o7777,
            (None, EntryKind::Directory) => 0o755,
            (None, _) => 0o644,
        };
        entries.push(FileEntry::new(name, kind, mode));
    }
    Ok(entries)
}

#[async_trait]
impl Provider for ZipProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        if !self.path.is_file() {
            return Err(UpdateError::ProviderUnavailable(format!(
                "archive {} does not exist",
                self.path.display()
            )));
        }

        let file = File::open(&self.path)?;
        let mut archive = ZipArchive::new(file)?;
        let entries = index_entries(&mut archive)?;
        info!("Opened zip archive {:?} ({} entries)", self.path, entries.len());

        self.state = Some(OpenArchive {
            archive: Mutex::new(archive),
            entries,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpdateError> {
        self.state = None;
        Ok(())
    }

    async fn latest_version(&self) -> Result<String, UpdateError> {
        archive_version(&self.path)
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        for entry in &self.state()?.entries {
            visitor(entry)?;
        }
        Ok(())
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        let state = self.state()?;
        let mut archive = state
            .archive
            .lock()
            .map_err(|_| UpdateError::Archive("archive lock poisoned".to_string()))?;

        let mut member = match archive.by_name(src) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Err(UpdateError::FileNotFound(src.to_string())),
            Err(e) => return Err(e.into()),
        };
        if member.is_dir() {
            return Err(UpdateError::FileNotFound(src.to_string()));
        }
        let mode = member.unix_mode();

        debug!("Extracting {} -> {:?}", src, dest);
        let copied = File::create(dest).and_then(|mut out| io::copy(&mut member, &mut out));
        if let Err(e) = copied {
            discard_partial(dest);
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = mode {
                let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
                if let Err(e) = std::fs::set_permissions(dest, permissions) {
                    discard_partial(dest);
                    return Err(e.into());
                }
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }
}
