//! # Node Wallet
//!
//! Each node owns one Ed25519 keypair. The HTTP producer path uses it to
//! sign the messages it submits and stamps the result into the block
//! payload as `from` (hex public key) and `signature` (hex signature).
//!
//! The chain never checks these fields. They are opaque payload content;
//! anyone who cares can call [`verify`] on a post after the fact.
//!
//! The secret key lives on disk as 64 hex characters. It is never logged.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while loading, creating, or using a wallet.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid secret key: expected 32 hex-encoded bytes")]
    InvalidSecretKey,

    #[error("wallet file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An Ed25519 signing identity.
///
/// Deliberately not `Serialize`: writing the secret out is an explicit call
/// to [`Wallet::save`], never a side effect of serializing something bigger.
pub struct Wallet {
    signing_key: SigningKey,
}

impl Wallet {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic wallet from a 32-byte seed. Intended for tests.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a hex-encoded secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| WalletError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Load the wallet stored at `path`, or generate one and store it there.
    pub fn load_or_generate(path: &Path) -> Result<Self, WalletError> {
        if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| WalletError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let wallet = Self::from_hex(&contents)?;
            info!(public_key = %wallet.public_key_hex(), "wallet loaded");
            return Ok(wallet);
        }

        let wallet = Self::generate();
        wallet.save(path)?;
        info!(public_key = %wallet.public_key_hex(), path = %path.display(), "wallet created");
        Ok(wallet)
    }

    /// Write the secret key to `path` as hex. On Unix the file is made
    /// readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let io_err = |source: io::Error| WalletError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, hex::encode(self.signing_key.to_bytes())).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }

        Ok(())
    }

    /// Hex-encoded public key. This is the `from` field of a post and the
    /// key of the author's token balance.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign `message` and return the 64-byte signature as hex.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wallet(pub={})", self.public_key_hex())
    }
}

/// Check a hex signature produced by [`Wallet::sign`] against a hex public
/// key. Malformed hex, wrong lengths, and invalid points all yield `false`.
pub fn verify(message: &[u8], signature_hex: &str, public_key_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex.trim()) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    verifying_key
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}
