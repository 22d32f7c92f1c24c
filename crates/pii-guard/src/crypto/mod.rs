//! Cipher engine: symmetric, asymmetric, and hybrid encryption of payloads.
//!
//! [`symmetric`] and [`asymmetric`] are pure byte transforms with no key
//! store or I/O dependencies. [`engine::CipherEngine`] ties them to the key
//! manager and produces / consumes [`common::EncryptedData`] envelopes.
//!
//! # Integrity
//!
//! Every decrypt fails closed. A missing IV, a missing GCM tag, an AEAD
//! failure, a malformed asymmetric layout, or a plaintext checksum mismatch
//! is reported as [`common::CryptoError::Integrity`]; there is no fallback to
//! an unauthenticated path.

pub mod asymmetric;
pub mod engine;
pub mod symmetric;

pub use engine::{CipherEngine, EncryptOptions};
pub use symmetric::KEY_LEN;

use common::CryptoError;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Errors produced by the cipher primitives.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (AES keys must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The IV is missing or the wrong length.
    #[error("invalid or missing IV")]
    InvalidIv,

    /// The GCM tag is missing or the wrong length.
    #[error("invalid or missing authentication tag")]
    InvalidTag,

    /// AES-GCM authentication failed (wrong key or tampered data).
    #[error("aead operation failed")]
    AeadFailure,

    /// CBC padding was invalid after decryption.
    #[error("invalid padding")]
    Padding,

    /// RSA-OAEP encryption failed (e.g. payload too large for the modulus).
    #[error("rsa encryption failed: {0}")]
    RsaEncrypt(String),

    /// RSA-OAEP decryption failed (wrong key or tampered data).
    #[error("rsa decryption failed")]
    RsaDecrypt,

    /// An asymmetric ciphertext does not match the expected layout.
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    /// The asymmetric mode byte is not recognised.
    #[error("unknown asymmetric mode byte 0x{0:02x}")]
    UnknownMode(u8),
}

impl From<CipherError> for CryptoError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::InvalidKeyLength => CryptoError::Configuration(e.to_string()),
            CipherError::RsaEncrypt(_) => CryptoError::InvalidInput(e.to_string()),
            CipherError::UnknownMode(_) => CryptoError::UnsupportedAlgorithm(e.to_string()),
            CipherError::InvalidIv
            | CipherError::InvalidTag
            | CipherError::AeadFailure
            | CipherError::Padding
            | CipherError::RsaDecrypt
            | CipherError::Malformed(_) => CryptoError::Integrity(e.to_string()),
        }
    }
}

/// Fill a fixed-size array from the OS CSPRNG.
pub(crate) fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}
