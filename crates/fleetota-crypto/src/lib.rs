//! `fleetota` crypto primitives
//!
//! - **Trust**: registry of trusted signers, "who signed these bytes?"
//! - **Secrets**: order secret derived from the authorizing signature
//! - **Digests**: SHA-256 content digests used by archive manifests

pub mod digest;
pub mod error;
pub mod secret;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod trust;

pub use digest::{HashingWriter, sha256_file, sha256_hex};
pub use error::CryptoError;
pub use secret::{derive_secret, secrets_match};
#[cfg(any(test, feature = "test-utils"))]
pub use testing::TestSigner;
pub use trust::{Ed25519PublicKey, SignatureVerifier, TrustedSigners};
