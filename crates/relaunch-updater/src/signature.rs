//! Signature manifests for release trees.
//!
//! A manifest maps every regular file of a directory tree (by its
//! root-relative, forward-slash path) to an RSA signature of the file's
//! SHA-256 digest. It is stored as `signatures.json` at the root of the tree
//! it describes:
//!
//! ```text
//! {
//!   "Version": "1",
//!   "SignaturesMap": {
//!     "bin/myapp_linux_x86_64": "<base64 signature>",
//!     "VERSION": "<base64 signature>"
//!   }
//! }
//! ```
//!
//! The manifest file itself is never signed, so verifying a complete tree
//! always reports exactly one unverified path: `signatures.json`.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::crypto;
use crate::error::UpdateError;

/// File name of the manifest at the root of a signed tree.
pub const SIGNATURE_FILE_NAME: &str = "signatures.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: &str = "1";

/// Per-file signatures of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureManifest {
    /// Manifest format version
    #[serde(rename = "Version")]
    version: String,
    /// Normalized relative path to raw signature bytes
    #[serde(rename = "SignaturesMap", default, with = "signature_map_serde")]
    signatures: BTreeMap<String, Vec<u8>>,
}

impl Default for SignatureManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            signatures: BTreeMap::new(),
        }
    }

    /// Sign every regular file below `root`.
    ///
    /// A manifest already present at `root/signatures.json` is skipped. Any
    /// walk or read error aborts signing.
    pub fn sign_folder(key: &RsaPrivateKey, root: &Path) -> Result<Self, UpdateError> {
        info!("Signing folder {:?}", root);
        let mut manifest = Self::new();

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_key(root, entry.path());
            if rel == SIGNATURE_FILE_NAME {
                continue;
            }

            let signature = crypto::sign_file(key, entry.path())?;
            debug!(path = %rel, "signed");
            manifest.signatures.insert(rel, signature);
        }

        info!("Signed {} files", manifest.len());
        Ok(manifest)
    }

    /// Verify every regular file below `root` against this manifest.
    ///
    /// Returns the normalized paths that have no signature, a mismatched
    /// signature, or could not be read. One bad file never stops the pass.
    pub fn verify_folder(&self, key: &RsaPublicKey, root: &Path) -> Result<Vec<String>, UpdateError> {
        let mut unverified = Vec::new();

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_key(root, entry.path());
            if let Err(e) = self.verify_file(key, &rel, entry.path()) {
                debug!(path = %rel, error = %e, "file not verified");
                unverified.push(rel);
            }
        }

        if unverified.len() > 1 {
            warn!("{} files failed verification under {:?}", unverified.len(), root);
        }
        Ok(unverified)
    }

    /// Verify a single file, recorded under `rel_path`, stored at `full_path`.
    pub fn verify_file(
        &self,
        key: &RsaPublicKey,
        rel_path: &str,
        full_path: &Path,
    ) -> Result<(), UpdateError> {
        let rel = normalize_path(rel_path);
        let signature = self
            .signatures
            .get(&rel)
            .ok_or_else(|| UpdateError::SignatureVerificationFailed {
                path: rel.clone(),
                reason: "no signature recorded".to_string(),
            })?;

        crypto::verify_file(key, signature, full_path).map_err(|e| match e {
            UpdateError::SignatureVerificationFailed { reason, .. } => {
                UpdateError::SignatureVerificationFailed { path: rel, reason }
            }
            other => UpdateError::SignatureVerificationFailed {
                path: rel,
                reason: other.to_string(),
            },
        })
    }

    /// Record a signature, replacing any previous one for the path.
    pub fn add(&mut self, rel_path: &str, signature: Vec<u8>) {
        self.signatures.insert(normalize_path(rel_path), signature);
    }

    /// Remove and return the signature for a path.
    pub fn remove(&mut self, rel_path: &str) -> Option<Vec<u8>> {
        self.signatures.remove(&normalize_path(rel_path))
    }

    pub fn get(&self, rel_path: &str) -> Option<&[u8]> {
        self.signatures
            .get(&normalize_path(rel_path))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.signatures.contains_key(&normalize_path(rel_path))
    }

    /// Signed paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.signatures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Load a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read(path)?;
        let manifest: Self = serde_json::from_slice(&content)?;
        if manifest.version != MANIFEST_VERSION {
            warn!(
                version = %manifest.version,
                "signature manifest has an unexpected format version"
            );
        }
        debug!("Loaded {} signatures from {:?}", manifest.len(), path);
        Ok(manifest)
    }

    /// Save the manifest as JSON.
    pub fn save(&self, path: &Path) -> Result<(), UpdateError> {
        let content = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("Saved {} signatures to {:?}", self.len(), path);
        Ok(())
    }

    /// Load `root/signatures.json`.
    pub fn load_from_folder(root: &Path) -> Result<Self, UpdateError> {
        Self::load(&root.join(SIGNATURE_FILE_NAME))
    }

    /// Save as `root/signatures.json`.
    pub fn save_to_folder(&self, root: &Path) -> Result<(), UpdateError> {
        self.save(&root.join(SIGNATURE_FILE_NAME))
    }
}

/// Whether a [`SignatureManifest::verify_folder`] result describes a fully
/// signed tree. The manifest's own file is the one allowed leftover.
pub fn is_fully_verified(unverified: &[String]) -> bool {
    unverified.len() <= 1
}

/// Normalize a relative path to the manifest key form.
pub fn normalize_path(path: &str) -> String {
    let slashed = if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    };
    slashed.trim_start_matches("./").to_string()
}

/// Manifest key of `path` relative to `root`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Serde helper storing signatures as base64 strings.
mod signature_map_serde {
    use std::collections::BTreeMap;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (path, signature) in map {
            out.serialize_entry(path, &STANDARD.encode(signature))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|(path, signature)| {
                STANDARD
                    .decode(signature.as_bytes())
                    .map(|bytes| (path, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn test_key() -> RsaPrivateKey {
        crypto::generate_private_key_with_bits(1024).unwrap()
    }

    #[test]
    fn test_add_get_remove_normalize() {
        let mut manifest = SignatureManifest::new();
        manifest.add("./bin/app", vec![1, 2, 3]);

        assert_eq!(manifest.get("bin/app"), Some(&[1u8, 2, 3][..]));
        assert!(manifest.contains("./bin/app"));
        assert_eq!(manifest.remove("bin/app"), Some(vec![1, 2, 3]));
        assert!(manifest.is_empty());
        assert_eq!(manifest.remove("bin/app"), None);
    }

    #[test]
    fn test_json_layout() {
        let mut manifest = SignatureManifest::new();
        manifest.add("a/b", vec![0xde, 0xad, 0xbe, 0xef]);

        let json: serde_json::Value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["Version"], "1");
        assert_eq!(json["SignaturesMap"]["a/b"], "3q2+7w==");

        let back: SignatureManifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_null_map_loads_empty() {
        let manifest: SignatureManifest =
            serde_json::from_str(r#"{"Version":"1","SignaturesMap":null}"#).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let result: Result<SignatureManifest, _> =
            serde_json::from_str(r#"{"Version":"1","SignaturesMap":{"a":"!!"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sign_and_verify_folder() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "VERSION", b"v1.0.0");
        create_test_file(temp.path(), "bin/app_linux_x86_64", b"binary");
        fs::create_dir(temp.path().join("empty")).unwrap();

        let key = test_key();
        let manifest = SignatureManifest::sign_folder(&key, temp.path()).unwrap();
        assert_eq!(
            manifest.paths().collect::<Vec<_>>(),
            vec!["VERSION", "bin/app_linux_x86_64"]
        );
        manifest.save_to_folder(temp.path()).unwrap();

        let loaded = SignatureManifest::load_from_folder(temp.path()).unwrap();
        let unverified = loaded
            .verify_folder(&key.to_public_key(), temp.path())
            .unwrap();
        assert_eq!(unverified, vec![SIGNATURE_FILE_NAME.to_string()]);
        assert!(is_fully_verified(&unverified));
    }

    #[test]
    fn test_resigning_skips_existing_manifest() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "file", b"content");
        let key = test_key();

        SignatureManifest::sign_folder(&key, temp.path())
            .unwrap()
            .save_to_folder(temp.path())
            .unwrap();
        let again = SignatureManifest::sign_folder(&key, temp.path()).unwrap();
        assert!(!again.contains(SIGNATURE_FILE_NAME));
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_verify_file_missing_signature() {
        let temp = TempDir::new().unwrap();
        let path = create_test_file(temp.path(), "file", b"content");
        let manifest = SignatureManifest::new();

        let result = manifest.verify_file(&test_key().to_public_key(), "file", &path);
        match result {
            Err(UpdateError::SignatureVerificationFailed { path, .. }) => assert_eq!(path, "file"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/srv/release");
        assert_eq!(
            relative_key(root, Path::new("/srv/release/bin/app")),
            "bin/app"
        );
    }
}
