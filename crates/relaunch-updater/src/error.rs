//! Error types for the update system.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while checking for, fetching, verifying or applying updates.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The content source cannot be reached or has nothing to offer
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A requested member does not exist in an open provider
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A retrieved file does not match its recorded signature
    #[error("signature verification failed for {path}: {reason}")]
    SignatureVerificationFailed { path: String, reason: String },

    /// A filesystem step of the patch failed
    #[error("patch {operation} failed for {}: {source}", path.display())]
    PatchFailed {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The post-update hook reported a failure
    #[error("post-update hook failed: {0}")]
    HookFailed(#[source] Box<UpdateError>),

    /// Archive suffix is neither `.zip` nor `.tar.gz`
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Repository identifier could not be parsed
    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    /// Operation requires `open` to have been called first
    #[error("provider is not open")]
    NotOpen,

    /// Archive is corrupt or unreadable
    #[error("archive error: {0}")]
    Archive(String),

    /// Key material could not be generated, parsed or encoded
    #[error("key error: {0}")]
    Key(String),

    /// A walk was stopped by its visitor
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Download failed with HTTP status
    #[error("download failed with status {status}")]
    DownloadFailed { status: u16 },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::ProviderUnavailable(_)
                | UpdateError::HttpError(_)
                | UpdateError::DownloadFailed { .. }
        )
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::HttpError(err.to_string())
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => UpdateError::IoError(e),
            other => UpdateError::Archive(other.to_string()),
        }
    }
}

impl From<rsa::Error> for UpdateError {
    fn from(err: rsa::Error) -> Self {
        UpdateError::Key(err.to_string())
    }
}
