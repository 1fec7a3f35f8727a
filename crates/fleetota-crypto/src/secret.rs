//! Order secrets.
//!
//! The secret of an update order is derived from the bytes of the signature
//! that authorized it, so re-issuing the identical signed order yields the
//! identical secret.

use subtle::ConstantTimeEq;

use crate::digest::sha256_hex;

/// Derive the order secret from the authorizing signature bytes.
pub fn derive_secret(signature: &[u8]) -> String {
    sha256_hex(signature)
}

/// Compare two secrets without leaking the position of the first mismatch.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
