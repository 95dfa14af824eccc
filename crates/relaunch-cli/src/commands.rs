//! Command implementations.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;
use relaunch_updater::{crypto, is_fully_verified, SignatureManifest, UpdaterConfig};
use thiserror::Error;
use tracing::{debug, info};

use crate::cli::{CheckArgs, KeygenArgs, SignArgs, VerifyArgs};
use crate::ExitCode;

/// Smallest key size keygen accepts.
pub const MIN_KEY_BITS: usize = 1024;

/// Failures caused by the arguments rather than the environment.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("refusing to overwrite existing key file {0}")]
    KeyExists(PathBuf),

    #[error("key size {0} is too small, use at least 1024 bits")]
    KeyTooSmall(usize),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

impl CommandError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::InvalidInput
    }
}

/// Exit code for an error returned by a command.
pub fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<CommandError>() {
        Some(e) => e.exit_code(),
        None => ExitCode::GeneralError,
    }
}

/// Public key path for a private key path: `<name>.pub`.
pub fn public_key_path(private: &Path) -> PathBuf {
    let mut name = OsString::from(private.as_os_str());
    name.push(".pub");
    PathBuf::from(name)
}

pub fn keygen(args: &KeygenArgs) -> anyhow::Result<ExitCode> {
    if args.bits < MIN_KEY_BITS {
        return Err(CommandError::KeyTooSmall(args.bits).into());
    }
    let private_path = args.name.clone();
    let public_path = public_key_path(&private_path);
    for path in [&private_path, &public_path] {
        if path.exists() {
            return Err(CommandError::KeyExists(path.clone()).into());
        }
    }

    info!(bits = args.bits, "Generating RSA key pair");
    let key = crypto::generate_private_key_with_bits(args.bits)?;
    crypto::save_private_key(&key, &private_path)
        .with_context(|| format!("writing {}", private_path.display()))?;
    crypto::save_public_key(&key.to_public_key(), &public_path)
        .with_context(|| format!("writing {}", public_path.display()))?;

    println!("Private key: {}", private_path.display());
    println!("Public key:  {}", public_path.display());
    Ok(ExitCode::Success)
}

pub fn sign(args: &SignArgs) -> anyhow::Result<ExitCode> {
    ensure_directory(&args.path)?;
    let key = crypto::load_private_key(&args.key)
        .with_context(|| format!("loading private key {}", args.key.display()))?;

    let manifest = SignatureManifest::sign_folder(&key, &args.path)?;
    manifest.save_to_folder(&args.path)?;
    debug!(files = manifest.len(), "manifest written");

    println!("Signed {} files in {}", manifest.len(), args.path.display());
    Ok(ExitCode::Success)
}

pub fn verify(args: &VerifyArgs) -> anyhow::Result<ExitCode> {
    ensure_directory(&args.path)?;
    let key = crypto::load_public_key(&args.pubkey)
        .with_context(|| format!("loading public key {}", args.pubkey.display()))?;

    let manifest = SignatureManifest::load_from_folder(&args.path)
        .with_context(|| format!("reading signatures of {}", args.path.display()))?;
    let unverified = manifest.verify_folder(&key, &args.path)?;

    if is_fully_verified(&unverified) {
        println!("Verified {} files in {}", manifest.len(), args.path.display());
        return Ok(ExitCode::Success);
    }

    eprintln!("{} files failed verification:", unverified.len());
    for path in &unverified {
        eprintln!("  {path}");
    }
    Ok(ExitCode::VerificationFailed)
}

pub async fn check(args: &CheckArgs) -> anyhow::Result<ExitCode> {
    let config = UpdaterConfig::load_from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let updater = config.build_updater(&args.current)?;

    let latest = updater.latest_version().await?;
    let available = updater.can_update().await?;
    println!("Current version: {}", args.current);
    println!("Latest version:  {latest}");
    println!("Update available: {}", if available { "yes" } else { "no" });
    Ok(ExitCode::Success)
}

fn ensure_directory(path: &Path) -> Result<(), CommandError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(CommandError::NotADirectory(path.to_path_buf()))
    }
}
