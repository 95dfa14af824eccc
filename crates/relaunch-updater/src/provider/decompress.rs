use std::path::Path;

use super::{GzipProvider, Provider, ZipProvider};
use crate::error::UpdateError;

/// Pick an archive provider from the file name suffix.
///
/// `.zip` is read with [`ZipProvider`], `.tar.gz` with [`GzipProvider`].
/// The returned provider is not yet open.
pub fn decompress(path: impl AsRef<Path>) -> Result<Box<dyn Provider>, UpdateError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        Ok(Box::new(ZipProvider::new(path)))
    } else if name.ends_with(".tar.gz") {
        Ok(Box::new(GzipProvider::new(path)))
    } else {
        Err(UpdateError::UnsupportedFormat(path.display().to_string()))
    }
}
