//! Atomic replacement of a single file.
//!
//! The patcher swaps the file at `destination` for the contents of `source`
//! while keeping the previous file at `backup`:
//!
//! 1. read the whole source into memory,
//! 2. drop any stale backup,
//! 3. rename the destination to the backup path,
//! 4. write the new contents to the destination with the configured mode,
//! 5. run the optional verify function.
//!
//! A failed write or verification renames the backup back into place, so
//! the destination is never left missing or half-written. The backup must
//! live on the same filesystem as the destination for the renames to be
//! atomic.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::UpdateError;

/// Permission bits given to a patched executable.
pub const DEFAULT_MODE: u32 = 0o755;

/// Check run against the freshly written destination.
pub type VerifyFn = Box<dyn Fn(&Path) -> Result<(), UpdateError> + Send + Sync>;

/// Where a [`Patcher`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchState {
    #[default]
    Unapplied,
    Applied,
    RolledBack,
}

/// One backup-then-replace operation.
pub struct Patcher {
    source: Option<PathBuf>,
    destination: PathBuf,
    backup: PathBuf,
    mode: u32,
    verifier: Option<VerifyFn>,
    state: PatchState,
    write: fn(&Path, &[u8], u32) -> io::Result<()>,
}

impl Patcher {
    /// Create a patcher for `destination`, keeping the old file at `backup`.
    ///
    /// A patcher without a source can still roll back or clean up a previous
    /// patch of the same destination.
    pub fn new(destination: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            source: None,
            destination: destination.into(),
            backup: backup.into(),
            mode: DEFAULT_MODE,
            verifier: None,
            state: PatchState::Unapplied,
            write: write_file,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Run `verify` after writing; a failure rolls the patch back.
    pub fn with_verifier<F>(mut self, verify: F) -> Self
    where
        F: Fn(&Path) -> Result<(), UpdateError> + Send + Sync + 'static,
    {
        self.verifier = Some(Box::new(verify));
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    /// Replace the destination with the source.
    pub fn apply(&mut self) -> Result<(), UpdateError> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| UpdateError::ConfigError("patch has no source file".to_string()))?;

        info!("Patching {:?} from {:?}", self.destination, source);
        let content = fs::read(&source).map_err(|e| patch_error("read", &source, e))?;

        if let Err(e) = self.clean_up() {
            debug!("Ignoring stale backup cleanup failure: {}", e);
        }

        fs::rename(&self.destination, &self.backup)
            .map_err(|e| patch_error("backup", &self.destination, e))?;
        debug!("Moved {:?} to {:?}", self.destination, self.backup);

        if let Err(e) = (self.write)(&self.destination, &content, self.mode) {
            error!("Failed to write {:?}: {}", self.destination, e);
            if let Err(rollback_err) = self.rollback() {
                error!("Rollback after failed write also failed: {}", rollback_err);
            }
            return Err(patch_error("write", &self.destination, e));
        }
        self.state = PatchState::Applied;

        let verified = match &self.verifier {
            Some(verify) => verify(&self.destination),
            None => Ok(()),
        };
        if let Err(e) = verified {
            warn!("Verification of {:?} failed: {}", self.destination, e);
            if let Err(rollback_err) = self.rollback() {
                error!("Rollback after failed verification also failed: {}", rollback_err);
            }
            return Err(e);
        }

        info!("Patched {:?} ({} bytes)", self.destination, content.len());
        Ok(())
    }

    /// Move the backup back over the destination.
    pub fn rollback(&mut self) -> Result<(), UpdateError> {
        info!("Rolling back {:?} from {:?}", self.destination, self.backup);

        if !self.backup.exists() {
            return Err(patch_error(
                "rollback",
                &self.backup,
                io::Error::new(io::ErrorKind::NotFound, "no backup to restore"),
            ));
        }

        fs::rename(&self.backup, &self.destination)
            .map_err(|e| patch_error("rollback", &self.destination, e))?;
        self.state = PatchState::RolledBack;
        Ok(())
    }

    /// Delete the backup if there is one.
    pub fn clean_up(&self) -> Result<(), UpdateError> {
        match fs::remove_file(&self.backup) {
            Ok(()) => {
                debug!("Removed backup {:?}", self.backup);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(patch_error("clean up", &self.backup, e)),
        }
    }
}

impl std::fmt::Debug for Patcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patcher")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("backup", &self.backup)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("state", &self.state)
            .finish()
    }
}

fn patch_error(operation: &'static str, path: &Path, source: io::Error) -> UpdateError {
    UpdateError::PatchFailed {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn write_file(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
