//! The `EncryptedData` envelope produced by every encrypt call.
//!
//! # Persisted shape
//!
//! ```text
//! {
//!   "data": "<base64 ciphertext>",
//!   "keyId": "key_…",
//!   "algorithm": "aes-256-gcm",
//!   "iv": "<base64>",            // symmetric only
//!   "tag": "<base64>",           // GCM only
//!   "metadata": {"encryptedAt", "dataType", "version", "checksum", "format"}
//! }
//! ```
//!
//! Asymmetric envelopes carry their IV and tag inside `data` (see the cipher
//! engine's hybrid layout), so `iv` and `tag` are absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{base64_bytes, base64_opt};
use crate::key::KeyId;
use crate::pii::DataType;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// How the plaintext should be reconstructed after decryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Plaintext is a UTF-8 string.
    #[default]
    Text,
    /// Plaintext is a serialised JSON value.
    Json,
    /// Plaintext is raw bytes.
    Binary,
}

/// Envelope bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub encrypted_at: DateTime<Utc>,
    pub data_type: DataType,
    pub version: u32,
    /// Hex SHA-256 of the plaintext, re-verified after every decrypt.
    pub checksum: String,
    #[serde(default)]
    pub format: PayloadFormat,
}

/// An encrypted value plus everything needed to decrypt it, except the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub key_id: KeyId,
    pub algorithm: String,
    #[serde(with = "base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<Vec<u8>>,
    #[serde(with = "base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
    /// Reserved for key-derivation schemes; none of the current algorithms set it.
    #[serde(with = "base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    pub metadata: EnvelopeMetadata,
}

impl EncryptedData {
    /// Recognise an envelope embedded in a JSON record.
    ///
    /// Returns `None` for anything that is not an object with the envelope's
    /// required fields, so plain values pass through untouched.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !(obj.contains_key("data")
            && obj.contains_key("keyId")
            && obj.contains_key("algorithm")
            && obj.contains_key("metadata"))
        {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Serialise this envelope for embedding in a JSON record.
    pub fn to_json(&self) -> serde_json::Value {
        // Serialising plain strings, integers, and byte vectors cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> EncryptedData {
        EncryptedData {
            data: vec![1, 2, 3],
            key_id: "key_1".into(),
            algorithm: "aes-256-gcm".into(),
            iv: Some(vec![0u8; 16]),
            tag: Some(vec![9u8; 16]),
            salt: None,
            metadata: EnvelopeMetadata {
                encrypted_at: Utc::now(),
                data_type: DataType::Email,
                version: ENVELOPE_VERSION,
                checksum: "ab".repeat(32),
                format: PayloadFormat::Text,
            },
        }
    }

    #[test]
    fn json_embedding_is_recognised() {
        let env = envelope();
        let value = env.to_json();
        assert_eq!(value["keyId"], "key_1");
        assert!(value.get("salt").is_none());
        assert_eq!(EncryptedData::from_json(&value), Some(env));
    }

    #[test]
    fn plain_values_are_not_envelopes() {
        assert!(EncryptedData::from_json(&json!("alice@example.com")).is_none());
        assert!(EncryptedData::from_json(&json!({"data": "x", "keyId": "k"})).is_none());
    }

    #[test]
    fn format_defaults_to_text() {
        let mut value = envelope().to_json();
        value["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("format");
        let env = EncryptedData::from_json(&value).unwrap();
        assert_eq!(env.metadata.format, PayloadFormat::Text);
    }
}
