//! One-way, format-preserving pseudonymisation.
//!
//! Tokens are keyed HMAC-SHA256 digests of `data type ":" canonical value`,
//! truncated and shaped so they pass the same format checks as the original:
//!
//! | data type        | token                              |
//! |------------------|------------------------------------|
//! | email            | `token_<8 hex>@tokenized.local`    |
//! | phone            | `+33<9 hex>`                       |
//! | identity numbers | `TOK<10 HEX>`                      |
//! | anything else    | `TOKEN_<16 HEX>`                   |
//!
//! The same input always yields the same token under the same secret, so
//! tokens can be joined on. There is no vault; tokens cannot be reversed.

use common::{CryptoError, DataType};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::hashing::canonical_string;
use crate::keys::SecretBytes;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic tokenizer keyed by a process secret.
#[derive(Clone)]
pub struct Tokenizer {
    mac: HmacSha256,
}

impl Tokenizer {
    /// # Errors
    ///
    /// Returns [`CryptoError::Configuration`] if `secret` is empty.
    pub fn new(secret: &SecretBytes) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::Configuration(
                "tokenization secret must not be empty".into(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret.expose())
            .map_err(|e| CryptoError::Configuration(format!("invalid tokenization secret: {e}")))?;
        Ok(Self { mac })
    }

    /// Token for `value`, or `None` for `null`.
    pub fn tokenize_data(&self, value: &Value, data_type: DataType) -> Option<String> {
        let canonical = canonical_string(value)?;

        let mut mac = self.mac.clone();
        mac.update(data_type.as_str().as_bytes());
        mac.update(b":");
        mac.update(canonical.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());

        let token = match data_type {
            DataType::Email => format!("token_{}@tokenized.local", &digest[..8]),
            DataType::Phone => format!("+33{}", &digest[..9]),
            dt if dt.is_identity_number() => format!("TOK{}", digest[..10].to_ascii_uppercase()),
            _ => format!("TOKEN_{}", digest[..16].to_ascii_uppercase()),
        };
        Some(token)
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Tokenizer([REDACTED])")
    }
}
