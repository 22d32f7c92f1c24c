//! Key records as persisted in the key store, plus the metadata-only view
//! handed to administrators.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::base64_bytes;
use crate::error::CryptoError;
use crate::pii::DataType;

/// Unique identifier for a key record.
pub type KeyId = String;

/// Whether a key is a single secret or a public/private pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Symmetric,
    Asymmetric,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Symmetric => "symmetric",
            KeyType::Asymmetric => "asymmetric",
        }
    }
}

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    Encryption,
    Signing,
    Kdf,
}

/// Lifecycle state of a key.
///
/// States only ever move forward: `active → rotating → deprecated → revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Rotating,
    Deprecated,
    Revoked,
}

impl KeyStatus {
    fn rank(self) -> u8 {
        match self {
            KeyStatus::Active => 0,
            KeyStatus::Rotating => 1,
            KeyStatus::Deprecated => 2,
            KeyStatus::Revoked => 3,
        }
    }

    /// Returns `true` if moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: KeyStatus) -> bool {
        next.rank() >= self.rank()
    }

    /// Only active keys are selected for new encryptions.
    pub fn can_encrypt(self) -> bool {
        self == KeyStatus::Active
    }

    /// Everything short of revocation may still decrypt historical data.
    pub fn can_decrypt(self) -> bool {
        self != KeyStatus::Revoked
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotating => "rotating",
            KeyStatus::Deprecated => "deprecated",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a restricted key may be limited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOperation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Derive,
}

/// Cipher algorithms understood by the cipher engine.
///
/// Records and envelopes carry the algorithm as a string so that a record
/// written by a newer build fails with [`CryptoError::UnsupportedAlgorithm`]
/// instead of a deserialisation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// AES-256 in GCM mode with a 16-byte IV and detached 16-byte tag.
    Aes256Gcm,
    /// AES-256 in CBC mode with PKCS#7 padding. Unauthenticated.
    Aes256Cbc,
    /// RSA-OAEP with SHA-256, falling back to the hybrid scheme for large payloads.
    RsaOaepSha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::Aes256Cbc => "aes-256-cbc",
            Algorithm::RsaOaepSha256 => "rsa-oaep-sha256",
        }
    }

    /// The key type an algorithm runs on.
    pub fn key_type(&self) -> KeyType {
        match self {
            Algorithm::Aes256Gcm | Algorithm::Aes256Cbc => KeyType::Symmetric,
            Algorithm::RsaOaepSha256 => KeyType::Asymmetric,
        }
    }

    /// Default algorithm for newly generated keys of `key_type`.
    pub fn default_for(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Symmetric => Algorithm::Aes256Gcm,
            KeyType::Asymmetric => Algorithm::RsaOaepSha256,
        }
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "aes-256-cbc" => Ok(Algorithm::Aes256Cbc),
            "rsa-oaep-sha256" => Ok(Algorithm::RsaOaepSha256),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping attached to every key record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_scheduled: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    pub version: u32,
    /// RSA modulus size, recorded so rotation reproduces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulus_bits: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl KeyMetadata {
    /// Fresh metadata for a key created at `now`.
    pub fn new(now: DateTime<Utc>, version: u32) -> Self {
        Self {
            created_at: now,
            last_used: now,
            rotation_scheduled: None,
            usage_count: 0,
            version,
            modulus_bits: None,
            revoked_at: None,
            revocation_reason: None,
        }
    }
}

/// Optional usage limits on a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRestrictions {
    /// Empty means every operation is allowed.
    #[serde(default)]
    pub allowed_operations: Vec<KeyOperation>,
    /// Empty means every data type is allowed.
    #[serde(default)]
    pub allowed_data_types: Vec<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl KeyRestrictions {
    /// Returns a description of the violated restriction, if any.
    pub fn check(
        &self,
        op: KeyOperation,
        data_type: Option<DataType>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !self.allowed_operations.is_empty() && !self.allowed_operations.contains(&op) {
            return Some(format!("operation {op:?} not allowed"));
        }
        if let Some(dt) = data_type {
            if !self.allowed_data_types.is_empty() && !self.allowed_data_types.contains(&dt) {
                return Some(format!("data type {} not allowed", dt.as_str()));
            }
        }
        // Expired keys stop encrypting but keep decrypting what they already protect.
        if op == KeyOperation::Encrypt {
            if let Some(expires_at) = self.expires_at {
                if now >= expires_at {
                    return Some(format!("key expired at {expires_at}"));
                }
            }
        }
        None
    }
}

/// A key record exactly as persisted in the key store.
///
/// `key_data` holds the raw AES key for symmetric keys and the PKCS#8 DER
/// private key for asymmetric keys.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKey {
    pub id: KeyId,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub algorithm: String,
    #[serde(with = "base64_bytes")]
    pub key_data: Vec<u8>,
    /// PEM-encoded SubjectPublicKeyInfo, asymmetric keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub purpose: KeyPurpose,
    pub status: KeyStatus,
    pub metadata: KeyMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<KeyRestrictions>,
}

impl EncryptionKey {
    /// Parse the record's algorithm string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedAlgorithm`] for unknown algorithm names.
    pub fn algorithm(&self) -> Result<Algorithm, CryptoError> {
        self.algorithm.parse()
    }

    /// The metadata-only view of this record.
    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            id: self.id.clone(),
            key_type: self.key_type,
            algorithm: self.algorithm.clone(),
            public_key: self.public_key.clone(),
            purpose: self.purpose,
            status: self.status,
            metadata: self.metadata.clone(),
            restrictions: self.restrictions.clone(),
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("EncryptionKey")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("algorithm", &self.algorithm)
            .field("key_data", &"[REDACTED]")
            .field("purpose", &self.purpose)
            .field("status", &self.status)
            .field("metadata", &self.metadata)
            .field("restrictions", &self.restrictions)
            .finish()
    }
}

/// Key metadata returned to administrators. Carries no private key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: KeyId,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub purpose: KeyPurpose,
    pub status: KeyStatus,
    pub metadata: KeyMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<KeyRestrictions>,
}
