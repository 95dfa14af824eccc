//! Configuration structures for the updater.
//!
//! An [`UpdaterConfig`] describes where releases come from, which
//! executable to patch, and how to reach the network. It is usually stored
//! as TOML next to the application:
//!
//! ```toml
//! executable_name = "myapp"
//!
//! [provider]
//! kind = "github"
//! repository_url = "github.com/owner/myapp"
//! archive_name = "binaries_linux.zip"
//!
//! [security]
//! public_key_path = "keys/id_rsa.pub"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::download::Downloader;
use crate::error::UpdateError;
use crate::provider::{
    decompress, GithubProvider, GitlabProvider, GzipProvider, LocalProvider, Provider,
    SecureProvider, ZipProvider,
};
use crate::updater::Updater;

/// Main updater configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Base name of the executable; artifacts are `<name>_<os>_<arch>`
    pub executable_name: String,

    /// File to patch instead of the running executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_executable: Option<PathBuf>,

    /// Where releases come from
    pub provider: ProviderConfig,

    /// Signature enforcement
    #[serde(default)]
    pub security: SecurityConfig,

    /// HTTP settings for remote providers
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Release source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// A directory holding the release tree and a `VERSION` file
    Local { path: PathBuf },
    /// A `.zip` archive
    Zip { path: PathBuf },
    /// A `.tar.gz` archive
    Gzip { path: PathBuf },
    /// An archive whose reader is picked from its suffix
    Archive { path: PathBuf },
    /// Tagged releases of a GitHub repository
    Github {
        repository_url: String,
        archive_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_base: Option<String>,
    },
    /// Releases of a GitLab project
    Gitlab {
        project_id: u64,
        archive_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_base: Option<String>,
    },
}

/// Signature enforcement settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// PEM public key; when set every retrieved file must be signed by it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Read timeout for streaming in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("relaunch-updater/{}", env!("CARGO_PKG_VERSION"))
}

impl UpdaterConfig {
    /// Minimal configuration for `executable_name` served by `provider`.
    pub fn new(executable_name: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            executable_name: executable_name.into(),
            override_executable: None,
            provider,
            security: SecurityConfig::default(),
            network: NetworkConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.executable_name.trim().is_empty() {
            return Err(UpdateError::ConfigError(
                "executable_name must not be empty".to_string(),
            ));
        }
        match &self.provider {
            ProviderConfig::Github { archive_name, .. } | ProviderConfig::Gitlab { archive_name, .. }
                if archive_name.trim().is_empty() =>
            {
                Err(UpdateError::ConfigError(
                    "archive_name must not be empty".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Construct the configured provider, wrapped in a [`SecureProvider`]
    /// when a public key is configured.
    pub fn build_provider(&self) -> Result<Box<dyn Provider>, UpdateError> {
        let backend: Box<dyn Provider> = match &self.provider {
            ProviderConfig::Local { path } => Box::new(LocalProvider::new(path)),
            ProviderConfig::Zip { path } => Box::new(ZipProvider::new(path)),
            ProviderConfig::Gzip { path } => Box::new(GzipProvider::new(path)),
            ProviderConfig::Archive { path } => decompress(path)?,
            ProviderConfig::Github {
                repository_url,
                archive_name,
                api_base,
            } => {
                let mut provider = GithubProvider::new(repository_url, archive_name)
                    .with_downloader(Downloader::with_config(self.network.clone())?);
                if let Some(api_base) = api_base {
                    provider = provider.with_api_base(api_base);
                }
                Box::new(provider)
            }
            ProviderConfig::Gitlab {
                project_id,
                archive_name,
                api_base,
            } => {
                let mut provider = GitlabProvider::new(*project_id, archive_name)
                    .with_downloader(Downloader::with_config(self.network.clone())?);
                if let Some(api_base) = api_base {
                    provider = provider.with_api_base(api_base);
                }
                Box::new(provider)
            }
        };

        match &self.security.public_key_path {
            Some(path) => {
                let key = crypto::load_public_key(path)?;
                Ok(Box::new(SecureProvider::new(backend, key)))
            }
            None => Ok(backend),
        }
    }

    /// Construct an updater for the application currently at `version`.
    pub fn build_updater(&self, version: impl Into<String>) -> Result<Updater, UpdateError> {
        self.validate()?;
        let mut updater = Updater::new(self.build_provider()?, &self.executable_name, version);
        if let Some(path) = &self.override_executable {
            updater = updater.with_override_executable(path);
        }
        Ok(updater)
    }
}
