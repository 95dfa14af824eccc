//! Property-based tests for relaunch-updater.
//!
//! # Properties Tested
//!
//! - Signing a tree and verifying it leaves only the manifest unverified
//! - Changing one signed file flags exactly that file
//! - Patch then rollback restores the original bytes
//! - A visitor error stops a walk after the first entry
//! - Archive versions are found wherever they sit in the file name

#![cfg(test)]

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use proptest::prelude::*;
use rsa::RsaPrivateKey;
use tempfile::TempDir;

use crate::crypto::generate_private_key_with_bits;
use crate::error::UpdateError;
use crate::patcher::Patcher;
use crate::provider::{version_from_file_name, FileEntry, LocalProvider, Provider};
use crate::signature::{normalize_path, SignatureManifest, SIGNATURE_FILE_NAME};

static SIGNING_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| generate_private_key_with_bits(1024).expect("test key generation"));

// =============================================================================
// Generators
// =============================================================================

/// Generate file contents for a small release tree (1 to 5 files).
fn arb_tree() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..5)
}

/// Generate artifact content (1 byte to 8KB).
fn arb_artifact_content() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..8192)
}

/// Generate a relative path of 1 to 4 lowercase segments.
fn arb_relative_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9_]{1,8}", 1..4)
}

fn write_tree(dir: &Path, files: &[Vec<u8>]) {
    for (i, content) in files.iter().enumerate() {
        fs::write(dir.join(format!("file{i}")), content).unwrap();
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// =============================================================================
// Signature properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_signed_tree_verifies(files in arb_tree()) {
        let temp = TempDir::new().unwrap();
        write_tree(temp.path(), &files);

        let manifest = SignatureManifest::sign_folder(&SIGNING_KEY, temp.path()).unwrap();
        manifest.save_to_folder(temp.path()).unwrap();

        let unverified = SignatureManifest::load_from_folder(temp.path())
            .unwrap()
            .verify_folder(&SIGNING_KEY.to_public_key(), temp.path())
            .unwrap();
        prop_assert_eq!(unverified, vec![SIGNATURE_FILE_NAME.to_string()]);
    }

    #[test]
    fn prop_tampered_file_is_flagged(
        files in arb_tree(),
        pick in any::<prop::sample::Index>(),
        extra in any::<u8>(),
    ) {
        let temp = TempDir::new().unwrap();
        write_tree(temp.path(), &files);
        SignatureManifest::sign_folder(&SIGNING_KEY, temp.path())
            .unwrap()
            .save_to_folder(temp.path())
            .unwrap();

        let target = pick.index(files.len());
        let mut changed = files[target].clone();
        changed.push(extra);
        fs::write(temp.path().join(format!("file{target}")), changed).unwrap();

        let unverified = SignatureManifest::load_from_folder(temp.path())
            .unwrap()
            .verify_folder(&SIGNING_KEY.to_public_key(), temp.path())
            .unwrap();
        prop_assert_eq!(
            unverified,
            vec![format!("file{target}"), SIGNATURE_FILE_NAME.to_string()]
        );
    }
}

// =============================================================================
// Patcher and provider properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_apply_then_rollback_restores(
        original in arb_artifact_content(),
        replacement in arb_artifact_content(),
    ) {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("app");
        let source = temp.path().join("new");
        fs::write(&destination, &original).unwrap();
        fs::write(&source, &replacement).unwrap();

        let mut patcher = Patcher::new(&destination, temp.path().join("app.old")).with_source(&source);
        patcher.apply().unwrap();
        prop_assert_eq!(fs::read(&destination).unwrap(), replacement);

        patcher.rollback().unwrap();
        prop_assert_eq!(fs::read(&destination).unwrap(), original);

        patcher.clean_up().unwrap();
        patcher.clean_up().unwrap();
        prop_assert!(!temp.path().join("app.old").exists());
    }

    #[test]
    fn prop_walk_stops_at_first_error(files in arb_tree()) {
        let temp = TempDir::new().unwrap();
        write_tree(temp.path(), &files);
        let provider = LocalProvider::new(temp.path());

        let mut visited = 0usize;
        let result = block_on(provider.walk(&mut |_entry: &FileEntry| {
            visited += 1;
            Err(UpdateError::Cancelled("stop".to_string()))
        }));

        prop_assert!(matches!(result, Err(UpdateError::Cancelled(_))));
        prop_assert_eq!(visited, 1);
    }

    #[test]
    fn prop_version_found_in_archive_name(
        major in 0u32..1000,
        minor in 0u32..1000,
        patch in 0u32..1000,
        prefix in "[a-z_-]{0,12}",
        suffix in prop::sample::select(vec![".zip", ".tar.gz", "_linux.zip"]),
    ) {
        let name = format!("{prefix}v{major}.{minor}.{patch}{suffix}");
        prop_assert_eq!(
            version_from_file_name(Path::new(&name)),
            Some(format!("v{major}.{minor}.{patch}"))
        );
    }

    #[test]
    fn prop_normalized_paths_use_slashes(segments in arb_relative_path()) {
        let native = segments.join(std::path::MAIN_SEPARATOR_STR);
        let normalized = normalize_path(&native);
        prop_assert_eq!(&normalized, &segments.join("/"));

        let mut manifest = SignatureManifest::new();
        manifest.add(&native, vec![1]);
        let dotted = format!("./{}", segments.join("/"));
        prop_assert!(manifest.contains(&dotted));
    }
}
