//! Update orchestration.
//!
//! The [`Updater`] ties a provider to the running executable: it compares
//! versions, finds the artifact built for this platform, stages it in a
//! temporary directory and patches the executable in place.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::patcher::Patcher;
use crate::platform::Platform;
use crate::provider::{FileEntry, Provider};

/// Suffix appended to the executable path for the backup copy.
pub const BACKUP_SUFFIX: &str = ".old";

/// Result of [`Updater::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    /// Nothing could be determined; reported alongside an error
    #[default]
    Unknown,
    /// The running version is the latest one
    UpToDate,
    /// The executable was replaced
    Updated,
}

/// Callback run after a successful patch.
///
/// Its status becomes the result of [`Updater::update`]; it may call
/// [`Updater::rollback`] itself when it rejects the new executable.
pub type PostUpdateHook = Box<dyn Fn(&Updater) -> Result<UpdateStatus, UpdateError> + Send + Sync>;

/// Checks a provider for a new release and patches the executable.
///
/// The latest version is asked of the provider once per updater; build a new
/// updater to check again.
pub struct Updater {
    provider: Box<dyn Provider>,
    executable_name: String,
    version: String,
    override_executable: Option<PathBuf>,
    platform: Platform,
    post_update_hook: Option<PostUpdateHook>,
    latest_version: OnceCell<String>,
}

impl Updater {
    /// Create an updater for `executable_name`, currently running `version`.
    pub fn new(
        provider: Box<dyn Provider>,
        executable_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            executable_name: executable_name.into(),
            version: version.into(),
            override_executable: None,
            platform: Platform::current(),
            post_update_hook: None,
            latest_version: OnceCell::new(),
        }
    }

    /// Patch `path` instead of the running executable.
    pub fn with_override_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_executable = Some(path.into());
        self
    }

    /// Select artifacts built for another platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_post_update_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Updater) -> Result<UpdateStatus, UpdateError> + Send + Sync + 'static,
    {
        self.post_update_hook = Some(Box::new(hook));
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Change the running version, e.g. after a restart-less update.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Artifact stem searched for in the release, `<name>_<os>_<arch>`.
    pub fn platform_executable_name(&self) -> String {
        self.platform.executable_name(&self.executable_name)
    }

    /// The file that gets patched.
    pub fn executable_path(&self) -> Result<PathBuf, UpdateError> {
        match &self.override_executable {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    /// Latest version offered by the provider, fetched once.
    pub async fn latest_version(&self) -> Result<&str, UpdateError> {
        self.latest_version
            .get_or_try_init(|| self.provider.latest_version())
            .await
            .map(String::as_str)
    }

    /// Whether the provider offers a version different from the running one.
    pub async fn can_update(&self) -> Result<bool, UpdateError> {
        let latest = self.latest_version().await?;
        debug!(current = %self.version, latest = %latest, "compared versions");
        Ok(latest != self.version)
    }

    /// Replace the executable with the provider's latest release.
    ///
    /// Returns `UpToDate` without touching anything when the versions match.
    /// An error means the status is [`UpdateStatus::Unknown`]; the executable
    /// is then either untouched or restored, except when the post-update
    /// hook fails, which leaves rolling back to the hook.
    pub async fn update(&mut self) -> Result<UpdateStatus, UpdateError> {
        if !self.can_update().await? {
            info!(version = %self.version, "already up to date");
            return Ok(UpdateStatus::UpToDate);
        }

        let destination = self.executable_path()?;
        info!(
            "Updating {:?} from {} to {}",
            destination,
            self.version,
            self.latest_version().await?
        );

        let result = match self.provider.open().await {
            Ok(()) => self.install(&destination).await,
            Err(e) => Err(e),
        };
        if let Err(e) = self.provider.close().await {
            warn!("Failed to close provider: {}", e);
        }
        result?;

        match &self.post_update_hook {
            Some(hook) => {
                info!("Running post-update hook");
                hook(self).map_err(|e| UpdateError::HookFailed(Box::new(e)))
            }
            None => {
                info!("Update complete");
                Ok(UpdateStatus::Updated)
            }
        }
    }

    /// Restore the executable saved by the last update.
    pub fn rollback(&self) -> Result<(), UpdateError> {
        self.patcher()?.rollback()
    }

    /// Delete the executable saved by the last update.
    pub fn clean_up(&self) -> Result<(), UpdateError> {
        self.patcher()?.clean_up()
    }

    fn patcher(&self) -> Result<Patcher, UpdateError> {
        let destination = self.executable_path()?;
        let backup = backup_path(&destination);
        Ok(Patcher::new(destination, backup))
    }

    async fn install(&self, destination: &Path) -> Result<(), UpdateError> {
        let artifact = self.find_artifact().await?;
        info!("Found artifact {}", artifact);

        let staging = tempfile::Builder::new().prefix("relaunch-update").tempdir()?;
        let file_name = artifact.rsplit('/').next().unwrap_or(&artifact);
        let staged = staging.path().join(file_name);
        self.provider.retrieve(&artifact, &staged).await?;

        let mut patcher = Patcher::new(destination, backup_path(destination)).with_source(&staged);
        patcher.apply()
    }

    /// Path of the last regular file whose name contains the platform stem.
    async fn find_artifact(&self) -> Result<String, UpdateError> {
        let wanted = self.platform_executable_name();
        let mut found: Option<String> = None;
        let mut matches = 0usize;

        self.provider
            .walk(&mut |entry: &FileEntry| {
                if entry.is_file() && entry.file_name().contains(&wanted) {
                    matches += 1;
                    found = Some(entry.path.clone());
                }
                Ok(())
            })
            .await?;

        if matches > 1 {
            warn!(
                candidates = matches,
                "several artifacts match {}, using the last one", wanted
            );
        }
        found.ok_or_else(|| {
            UpdateError::FileNotFound(format!("no artifact named like {wanted} in the release"))
        })
    }
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("executable_name", &self.executable_name)
            .field("version", &self.version)
            .field("override_executable", &self.override_executable)
            .field("platform", &self.platform)
            .field("post_update_hook", &self.post_update_hook.is_some())
            .field("latest_version", &self.latest_version.get())
            .finish()
    }
}

/// Backup location for `destination`: same directory, `.old` appended.
pub fn backup_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LocalProvider;
    use tempfile::TempDir;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/opt/app/bin/app")),
            PathBuf::from("/opt/app/bin/app.old")
        );
        assert_eq!(backup_path(Path::new("app.exe")), PathBuf::from("app.exe.old"));
    }

    #[test]
    fn test_default_status_is_unknown() {
        assert_eq!(UpdateStatus::default(), UpdateStatus::Unknown);
    }

    #[tokio::test]
    async fn test_latest_version_is_cached() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("VERSION"), "v1.0").unwrap();
        let updater = Updater::new(Box::new(LocalProvider::new(temp.path())), "test", "v0.9");

        assert!(updater.can_update().await.unwrap());
        std::fs::write(temp.path().join("VERSION"), "v0.9").unwrap();
        assert_eq!(updater.latest_version().await.unwrap(), "v1.0");
        assert!(updater.can_update().await.unwrap());
    }

    #[test]
    fn test_platform_executable_name() {
        let updater = Updater::new(Box::new(LocalProvider::new("/srv")), "myapp", "v1")
            .with_platform(Platform::new("linux", "aarch64"));
        assert_eq!(updater.platform_executable_name(), "myapp_linux_aarch64");
    }

    #[test]
    fn test_override_executable() {
        let updater = Updater::new(Box::new(LocalProvider::new("/srv")), "myapp", "v1")
            .with_override_executable("/tmp/myapp");
        assert_eq!(updater.executable_path().unwrap(), PathBuf::from("/tmp/myapp"));
    }
}
