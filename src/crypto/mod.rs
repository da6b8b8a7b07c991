//! Cryptographic primitives for template protection and ballot auditing.
//!
//! - [`key`]: fresh 256-bit session keys from the OS entropy source.
//! - [`cipher`]: AES-256-GCM sealing of opaque template bytes.
//! - [`audit`]: key-bound integrity hashes for cast ballots.

pub mod audit;
pub mod cipher;
pub mod key;

use thiserror::Error;

pub use audit::{compute_hash, verify_hash};
pub use cipher::{decrypt, decrypt_base64, encrypt, Ciphertext, NONCE_LENGTH, TAG_LENGTH};
pub use key::{SessionKey, KEY_LENGTH};

/// Errors raised by the cryptographic primitives.
///
/// Callers on the verification path collapse all of them into a failed match.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Malformed ciphertext: {0}")]
    MalformedInput(String),
    #[error("Ciphertext failed authentication")]
    AuthenticationFailure,
    #[error("Failed to seal plaintext")]
    EncryptionFailure,
    #[error("Invalid base64: {0}")]
    Encoding(#[from] data_encoding::DecodeError),
    #[error("Session key must be {KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),
}
