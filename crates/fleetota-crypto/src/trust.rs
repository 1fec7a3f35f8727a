//! Trusted signer registry.
//!
//! Answers "who, if anyone, signed this exact byte sequence?" by trying
//! each trusted public key in turn. A key that fails to verify is not an
//! error, the next key is simply tried.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{debug, info, warn};

use crate::error::CryptoError;

/// File extension of public key files inside a keys directory.
pub const PUBLIC_KEY_EXTENSION: &str = "pub";

/// Detached-signature verification against a single public key.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` only if `signature` is a valid signature of `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// An Ed25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Ed25519PublicKey(VerifyingKey);

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ed25519PublicKey")
            .field(&hex::encode(self.0.as_bytes()))
            .finish()
    }
}

impl Ed25519PublicKey {
    /// Build from raw 32-byte key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        let key = VerifyingKey::from_bytes(&arr).map_err(|e| CryptoError::InvalidPublicKey {
            signer: String::new(),
            reason: e.to_string(),
        })?;
        Ok(Self(key))
    }

    /// Parse a hex-encoded key as stored in `keys/<signer>.pub`.
    pub fn from_hex(signer: &str, text: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidPublicKey {
            signer: signer.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            CryptoError::InvalidPublicKey { reason, .. } => CryptoError::InvalidPublicKey {
                signer: signer.to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Hex encoding of the key, the on-disk format.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl From<VerifyingKey> for Ed25519PublicKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key)
    }
}

impl SignatureVerifier for Ed25519PublicKey {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Some(signature) = parse_signature(signature) else {
            return false;
        };
        Verifier::verify(&self.0, message, &signature).is_ok()
    }
}

/// Accepts either the raw 64 signature bytes or their hex encoding.
fn parse_signature(bytes: &[u8]) -> Option<Signature> {
    if bytes.len() == Signature::BYTE_SIZE {
        return Signature::from_slice(bytes).ok();
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let decoded = hex::decode(text.trim()).ok()?;
    Signature::from_slice(&decoded).ok()
}

/// Static mapping of signer identity to public key.
///
/// Iteration order is by signer name, so the "first" matching signer is
/// deterministic.
#[derive(Default)]
pub struct TrustedSigners {
    signers: BTreeMap<String, Box<dyn SignatureVerifier>>,
}

impl fmt::Debug for TrustedSigners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedSigners")
            .field("signers", &self.signers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TrustedSigners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a trusted signer.
    pub fn insert(&mut self, name: impl Into<String>, verifier: impl SignatureVerifier + 'static) {
        self.signers.insert(name.into(), Box::new(verifier));
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with_signer(
        mut self,
        name: impl Into<String>,
        verifier: impl SignatureVerifier + 'static,
    ) -> Self {
        self.insert(name, verifier);
        self
    }

    /// Load every `<signer>.pub` file from `dir`.
    ///
    /// A missing directory yields an empty registry (every signature will be
    /// rejected); a malformed key file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self, CryptoError> {
        let mut trusted = Self::new();
        if !dir.exists() {
            warn!(dir = %dir.display(), "Keys directory does not exist, no signer is trusted");
            return Ok(trusted);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PUBLIC_KEY_EXTENSION) {
                debug!(path = %path.display(), "Skipping non-key file");
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            let key = Ed25519PublicKey::from_hex(name, &text)?;
            info!(signer = name, "Loaded trusted signer");
            trusted.insert(name, key);
        }
        Ok(trusted)
    }

    /// Return the first signer whose key verifies `signature` over `message`.
    pub fn find_signer(&self, message: &[u8], signature: &[u8]) -> Option<&str> {
        let signer = self
            .signers
            .iter()
            .find(|(_, key)| key.verify(message, signature))
            .map(|(name, _)| name.as_str());
        match signer {
            Some(name) => debug!(signer = name, "Signature verified"),
            None => debug!("No trusted signer matched"),
        }
        signer
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Names of all trusted signers, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.signers.keys().map(String::as_str)
    }
}
