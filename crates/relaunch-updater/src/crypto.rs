//! RSA key handling and single-file signatures.
//!
//! Files are signed by hashing their full contents with SHA-256 and signing
//! the digest with RSASSA-PKCS1-v1_5. Keys travel as PEM: private keys as
//! PKCS#1 (`RSA PRIVATE KEY`), public keys as PKIX (`PUBLIC KEY`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::UpdateError;

/// Modulus size used when no explicit size is requested.
pub const DEFAULT_KEY_BITS: usize = 4096;

const PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";
const PKCS8_PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";
const LEGACY_PUBLIC_KEY_TAG: &str = "RSA PUBLIC KEY";

/// Buffer size for hashing files.
const HASH_BUFFER_SIZE: usize = 8192;

/// Generate a new private key with [`DEFAULT_KEY_BITS`].
pub fn generate_private_key() -> Result<RsaPrivateKey, UpdateError> {
    generate_private_key_with_bits(DEFAULT_KEY_BITS)
}

/// Generate a new private key with the given modulus size.
pub fn generate_private_key_with_bits(bits: usize) -> Result<RsaPrivateKey, UpdateError> {
    debug!(bits, "generating RSA key");
    let mut rng = rand::thread_rng();
    Ok(RsaPrivateKey::new(&mut rng, bits)?)
}

/// Encode a private key as a PKCS#1 PEM document.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String, UpdateError> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| UpdateError::Key(e.to_string()))?;
    Ok(pem::encode(&pem::Pem::new(PRIVATE_KEY_TAG, der.as_bytes())))
}

/// Encode a public key as a PKIX PEM document.
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, UpdateError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| UpdateError::Key(e.to_string()))?;
    Ok(pem::encode(&pem::Pem::new(PUBLIC_KEY_TAG, der.as_bytes())))
}

/// Parse a PEM private key (PKCS#1 or PKCS#8).
pub fn parse_private_key_pem(data: &[u8]) -> Result<RsaPrivateKey, UpdateError> {
    let block = pem::parse(data).map_err(|e| UpdateError::Key(e.to_string()))?;
    let key = match block.tag() {
        PRIVATE_KEY_TAG => RsaPrivateKey::from_pkcs1_der(block.contents())
            .map_err(|e| UpdateError::Key(e.to_string()))?,
        PKCS8_PRIVATE_KEY_TAG => RsaPrivateKey::from_pkcs8_der(block.contents())
            .map_err(|e| UpdateError::Key(e.to_string()))?,
        other => {
            return Err(UpdateError::Key(format!(
                "unexpected PEM block {other:?}, expected a private key"
            )))
        }
    };
    Ok(key)
}

/// Parse a PEM public key.
///
/// Accepts PKIX bodies under either the `PUBLIC KEY` or the `RSA PUBLIC KEY`
/// label, and bare PKCS#1 bodies under `RSA PUBLIC KEY`.
pub fn parse_public_key_pem(data: &[u8]) -> Result<RsaPublicKey, UpdateError> {
    let block = pem::parse(data).map_err(|e| UpdateError::Key(e.to_string()))?;
    match block.tag() {
        PUBLIC_KEY_TAG => RsaPublicKey::from_public_key_der(block.contents())
            .map_err(|e| UpdateError::Key(e.to_string())),
        LEGACY_PUBLIC_KEY_TAG => RsaPublicKey::from_public_key_der(block.contents())
            .or_else(|_| RsaPublicKey::from_pkcs1_der(block.contents()))
            .map_err(|e| UpdateError::Key(e.to_string())),
        other => Err(UpdateError::Key(format!(
            "unexpected PEM block {other:?}, expected a public key"
        ))),
    }
}

/// Read and parse a private key file.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, UpdateError> {
    parse_private_key_pem(&std::fs::read(path)?)
}

/// Read and parse a public key file.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, UpdateError> {
    parse_public_key_pem(&std::fs::read(path)?)
}

/// Write a private key to a new file readable only by the owner.
///
/// Fails with `AlreadyExists` rather than replacing an existing key.
pub fn save_private_key(key: &RsaPrivateKey, path: &Path) -> Result<(), UpdateError> {
    write_new_file(path, private_key_to_pem(key)?.as_bytes(), 0o600)
}

/// Write a public key to a new file.
pub fn save_public_key(key: &RsaPublicKey, path: &Path) -> Result<(), UpdateError> {
    write_new_file(path, public_key_to_pem(key)?.as_bytes(), 0o644)
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), UpdateError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// SHA-256 of a file's contents.
pub fn checksum_file(path: &Path) -> Result<[u8; 32], UpdateError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn checksum_file_hex(path: &Path) -> Result<String, UpdateError> {
    checksum_file(path).map(hex::encode)
}

/// Sign the SHA-256 digest of a file.
pub fn sign_file(key: &RsaPrivateKey, path: &Path) -> Result<Vec<u8>, UpdateError> {
    let digest = checksum_file(path)?;
    let mut rng = rand::thread_rng();
    Ok(key.sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha256>(), &digest)?)
}

/// Check a signature produced by [`sign_file`].
pub fn verify_file(key: &RsaPublicKey, signature: &[u8], path: &Path) -> Result<(), UpdateError> {
    let digest = checksum_file(path)?;
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|e| UpdateError::SignatureVerificationFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
