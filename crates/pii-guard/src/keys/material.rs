//! In-memory key material: zeroized on drop, redacted in debug output.

use std::fmt;

use common::{CryptoError, EncryptionKey, KeyType};
use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Deserializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::KEY_LEN;

/// Heap buffer holding secret bytes (AES keys, the pepper, the token secret).
///
/// The buffer is zeroized when dropped.
#[derive(Clone)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the secret. Callers should not copy it into long-lived buffers.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretBytes {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(SecretBytes::from)
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.expose().ct_eq(other.expose()).into()
    }
}

impl Eq for SecretBytes {}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secrets.
        f.write_str("SecretBytes([REDACTED])")
    }
}

/// Parsed, ready-to-use key material for one key record.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Raw AES-256 key.
    Symmetric(SecretBytes),
    /// RSA key pair; the private half zeroizes itself on drop.
    Asymmetric {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
}

impl KeyMaterial {
    /// Decode the `key_data` of a persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Configuration`] if the stored bytes are not a
    /// valid key of the record's type.
    pub fn from_record(record: &EncryptionKey) -> Result<Self, CryptoError> {
        match record.key_type {
            KeyType::Symmetric => {
                if record.key_data.len() != KEY_LEN {
                    return Err(CryptoError::Configuration(format!(
                        "symmetric key {} has {} bytes, expected {KEY_LEN}",
                        record.id,
                        record.key_data.len()
                    )));
                }
                Ok(KeyMaterial::Symmetric(SecretBytes::new(
                    record.key_data.clone(),
                )))
            }
            KeyType::Asymmetric => {
                let private = RsaPrivateKey::from_pkcs8_der(&record.key_data).map_err(|e| {
                    CryptoError::Configuration(format!(
                        "asymmetric key {} is not a PKCS#8 RSA key: {e}",
                        record.id
                    ))
                })?;
                let public = private.to_public_key();
                Ok(KeyMaterial::Asymmetric {
                    private: Box::new(private),
                    public,
                })
            }
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Symmetric(_) => f.write_str("KeyMaterial::Symmetric([REDACTED])"),
            KeyMaterial::Asymmetric { .. } => f.write_str("KeyMaterial::Asymmetric([REDACTED])"),
        }
    }
}

/// A key record together with its decoded material, as held in the cache.
///
/// The record's `key_data` is wiped once decoded; only `material` holds the
/// secret.
#[derive(Debug, Clone)]
pub struct LoadedKey {
    pub record: EncryptionKey,
    pub material: KeyMaterial,
}

impl LoadedKey {
    pub fn new(mut record: EncryptionKey, material: KeyMaterial) -> Self {
        record.key_data.zeroize();
        Self { record, material }
    }

    pub fn from_record(record: EncryptionKey) -> Result<Self, CryptoError> {
        let material = KeyMaterial::from_record(&record)?;
        Ok(Self::new(record, material))
    }
}
