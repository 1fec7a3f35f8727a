//! Crypto error types.

/// Errors from loading trust material.
///
/// Signature verification itself never errors: a signature that does not
/// verify (or does not parse) simply has no signer.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid public key for signer '{signer}': {reason}")]
    InvalidPublicKey { signer: String, reason: String },

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
