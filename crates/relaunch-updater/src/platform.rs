//! Target platform naming for release artifacts.
//!
//! Release trees carry one executable per platform, named
//! `<executable>_<os>_<arch>` (for example `myapp_linux_x86_64`). The
//! updater looks for the entry whose file name contains that stem.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system and CPU architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Artifact stem for `name` on this platform.
    pub fn executable_name(&self, name: &str) -> String {
        format!("{}_{}_{}", name, self.os, self.arch)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// Artifact stem for `name` on the host platform.
pub fn platform_executable_name(name: &str) -> String {
    Platform::current().executable_name(name)
}
