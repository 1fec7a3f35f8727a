//! Deterministic signers for tests.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signer, SigningKey};

use crate::trust::{Ed25519PublicKey, PUBLIC_KEY_EXTENSION};

/// A named Ed25519 signing key derived from a one-byte seed.
pub struct TestSigner {
    pub name: String,
    key: SigningKey,
}

impl TestSigner {
    pub fn new(name: &str, seed: u8) -> Self {
        Self {
            name: name.to_string(),
            key: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    /// Raw 64-byte detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey::from(self.key.verifying_key())
    }

    /// Write the public key as `<dir>/<name>.pub`.
    pub fn install(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{PUBLIC_KEY_EXTENSION}", self.name));
        std::fs::write(&path, self.public_key().to_hex())?;
        Ok(path)
    }
}
