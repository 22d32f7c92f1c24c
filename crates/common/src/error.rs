//! Error taxonomy shared by every pii-guard component.

use thiserror::Error;

/// Top-level error type returned by encryption, decryption, and key
/// administration operations.
///
/// Variants are never downgraded on the way out: an integrity failure inside
/// the cipher layer reaches the caller as [`CryptoError::Integrity`], not as a
/// generic failure.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No usable key or setting is available for the requested operation
    /// (e.g. no active key for the requested key type).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The referenced key id is absent from the key store.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The referenced key has been revoked and may not encrypt or decrypt.
    #[error("key revoked: {0}")]
    KeyRevoked(String),

    /// AEAD verification failed, the ciphertext is malformed, or the plaintext
    /// checksum did not match after decryption.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The algorithm named by a key or envelope is not supported.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A key restriction (allowed operation, allowed data type, expiry) forbids the call.
    #[error("key {key_id} restricted: {reason}")]
    KeyRestricted { key_id: String, reason: String },

    /// The key is in a lifecycle state that does not allow the operation.
    #[error("key {key_id} is {status}: {reason}")]
    InvalidKeyState {
        key_id: String,
        status: String,
        reason: String,
    },

    /// The caller supplied a malformed record, path, or option.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The key store failed.
    #[error("key store error: {0}")]
    Storage(String),

    /// A key store call exceeded its deadline.
    #[error("key store call timed out after {0} ms")]
    Timeout(u64),
}

impl CryptoError {
    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::Configuration(_) => "configuration_error",
            CryptoError::KeyNotFound(_) => "key_not_found",
            CryptoError::KeyRevoked(_) => "key_revoked",
            CryptoError::Integrity(_) => "integrity_error",
            CryptoError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            CryptoError::KeyRestricted { .. } => "key_restricted",
            CryptoError::InvalidKeyState { .. } => "invalid_key_state",
            CryptoError::InvalidInput(_) => "invalid_input",
            CryptoError::Storage(_) => "storage_error",
            CryptoError::Timeout(_) => "timeout",
        }
    }
}

/// Result alias used across the workspace.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(CryptoError::Configuration("x".into()).code(), "configuration_error");
        assert_eq!(CryptoError::KeyNotFound("x".into()).code(), "key_not_found");
        assert_eq!(CryptoError::KeyRevoked("x".into()).code(), "key_revoked");
        assert_eq!(CryptoError::Integrity("x".into()).code(), "integrity_error");
        assert_eq!(
            CryptoError::UnsupportedAlgorithm("x".into()).code(),
            "unsupported_algorithm"
        );
        assert_eq!(CryptoError::Timeout(5).code(), "timeout");
    }

    #[test]
    fn display_includes_context() {
        let e = CryptoError::KeyRestricted {
            key_id: "key_1".into(),
            reason: "decrypt not allowed".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("key_1"));
        assert!(msg.contains("decrypt not allowed"));
    }
}
