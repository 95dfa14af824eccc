//! # relaunch-updater
//!
//! In-place self-update for applications shipped as a single executable.
//!
//! This crate handles:
//! - Release discovery through pluggable providers (local directory, zip and
//!   tar.gz archives, GitHub and GitLab releases)
//! - Per-file RSA signatures for whole release trees
//! - Verified retrieval through [`SecureProvider`]
//! - Atomic replacement of the running executable with rollback
//!
//! ## Security
//!
//! Wrap any provider in a [`SecureProvider`] to refuse files that are not
//! signed by the pinned public key. Retrieved files that fail verification
//! are deleted before the error is returned, so an unsigned artifact never
//! reaches the patcher.
//!
//! ## Example
//!
//! ```no_run
//! use relaunch_updater::{GithubProvider, SecureProvider, UpdateStatus, Updater};
//!
//! # async fn run(public_key_pem: &[u8]) -> Result<(), relaunch_updater::UpdateError> {
//! let provider = GithubProvider::new("github.com/owner/myapp", "binaries.zip");
//! let secure = SecureProvider::from_pem(Box::new(provider), public_key_pem)?;
//! let mut updater = Updater::new(Box::new(secure), "myapp", "v1.0.0");
//!
//! if updater.update().await? == UpdateStatus::Updated {
//!     println!("restart to run the new version");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod download;
pub mod error;
pub mod patcher;
pub mod platform;
#[cfg(test)]
mod proptests;
pub mod provider;
pub mod signature;
pub mod updater;

// Re-export main types for convenience
pub use config::{NetworkConfig, ProviderConfig, SecurityConfig, UpdaterConfig};
pub use download::{DownloadProgress, Downloader};
pub use error::UpdateError;
pub use patcher::{PatchState, Patcher};
pub use platform::{platform_executable_name, Platform};
pub use provider::{
    decompress, EntryKind, FileEntry, GithubProvider, GitlabProvider, GzipProvider, LocalProvider,
    Provider, SecureProvider, ZipProvider,
};
pub use signature::{is_fully_verified, SignatureManifest, SIGNATURE_FILE_NAME};
pub use updater::{UpdateStatus, Updater};
