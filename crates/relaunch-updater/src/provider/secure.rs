//! Signature-enforcing provider decorator.

use std::path::Path;

use async_trait::async_trait;
use rsa::RsaPublicKey;
use tracing::{error, info, warn};

use super::{discard_partial, Provider, Visitor};
use crate::crypto;
use crate::error::UpdateError;
use crate::signature::{SignatureManifest, SIGNATURE_FILE_NAME};

/// Wraps another provider and verifies every retrieved file.
///
/// Opening loads `signatures.json` from the wrapped provider. A retrieved
/// file whose signature is missing or does not verify against the public
/// key is deleted and reported as [`UpdateError::SignatureVerificationFailed`].
pub struct SecureProvider {
    backend: Box<dyn Provider>,
    public_key: RsaPublicKey,
    manifest: Option<SignatureManifest>,
}

impl SecureProvider {
    pub fn new(backend: Box<dyn Provider>, public_key: RsaPublicKey) -> Self {
        Self {
            backend,
            public_key,
            manifest: None,
        }
    }

    /// Wrap `backend` using a PEM-encoded public key.
    pub fn from_pem(backend: Box<dyn Provider>, public_key_pem: &[u8]) -> Result<Self, UpdateError> {
        Ok(Self::new(backend, crypto::parse_public_key_pem(public_key_pem)?))
    }

    /// The manifest loaded by `open`.
    pub fn manifest(&self) -> Option<&SignatureManifest> {
        self.manifest.as_ref()
    }

    async fn load_manifest(&self) -> Result<SignatureManifest, UpdateError> {
        let dir = tempfile::Builder::new().prefix("relaunch-signatures").tempdir()?;
        let path = dir.path().join(SIGNATURE_FILE_NAME);
        self.backend.retrieve(SIGNATURE_FILE_NAME, &path).await?;
        SignatureManifest::load(&path)
    }
}

#[async_trait]
impl Provider for SecureProvider {
    async fn open(&mut self) -> Result<(), UpdateError> {
        self.backend.open().await?;

        match self.load_manifest().await {
            Ok(manifest) => {
                info!("Loaded {} release signatures", manifest.len());
                self.manifest = Some(manifest);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load {}: {}", SIGNATURE_FILE_NAME, e);
                if let Err(close_err) = self.backend.close().await {
                    warn!("Failed to close provider after error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), UpdateError> {
        self.manifest = None;
        self.backend.close().await
    }

    async fn latest_version(&self) -> Result<String, UpdateError> {
        self.backend.latest_version().await
    }

    async fn walk(&self, visitor: &mut Visitor<'_>) -> Result<(), UpdateError> {
        self.backend.walk(visitor).await
    }

    async fn retrieve(&self, src: &str, dest: &Path) -> Result<(), UpdateError> {
        let manifest = self.manifest.as_ref().ok_or(UpdateError::NotOpen)?;
        self.backend.retrieve(src, dest).await?;

        if let Err(e) = manifest.verify_file(&self.public_key, src, dest) {
            error!(path = %src, "retrieved file failed signature verification");
            discard_partial(dest);
            return Err(e);
        }
        Ok(())
    }
}
