//! Salted, peppered one-way hashing of PII values.
//!
//! Stored form: `"<salt hex>:<digest hex>"`, where the digest covers
//! `canonical value ∥ salt hex ∥ pepper`. The pepper never leaves the
//! process; the salt travels with the hash so it can be re-verified.

use std::{fmt, str::FromStr};

use common::{CryptoError, DataType};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::keys::SecretBytes;

/// Digest used by [`Hasher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical text form of a value for hashing and tokenization.
///
/// Strings hash as themselves. Other values use their compact JSON
/// serialisation with object keys sorted, so equal values always produce
/// equal input. `null` has no canonical form.
pub fn canonical_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(sorted_keys(other).to_string()),
    }
}

fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

/// Salted + peppered hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    pepper: SecretBytes,
    algorithm: HashAlgorithm,
    salt_len: usize,
}

impl Hasher {
    pub fn new(pepper: SecretBytes, algorithm: HashAlgorithm, salt_len: usize) -> Self {
        Self {
            pepper,
            algorithm,
            salt_len,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash `value`, returning `"<salt hex>:<digest hex>"`.
    ///
    /// A fresh random salt is drawn unless one is supplied. Returns `None`
    /// for `null`.
    pub fn hash_data(
        &self,
        value: &Value,
        data_type: DataType,
        salt: Option<&[u8]>,
    ) -> Option<String> {
        let canonical = canonical_string(value)?;
        let salt_hex = match salt {
            Some(salt) => hex::encode(salt),
            None => {
                let mut salt = vec![0u8; self.salt_len];
                OsRng.fill_bytes(&mut salt);
                hex::encode(salt)
            }
        };
        let digest = self.digest(&canonical, &salt_hex);
        debug!(data_type = data_type.as_str(), algorithm = self.algorithm.as_str(), "value hashed");
        Some(format!("{salt_hex}:{digest}"))
    }

    /// Check `value` against a hash produced by [`hash_data`](Self::hash_data).
    ///
    /// Malformed stored hashes and `null` values never verify. The digest
    /// comparison runs in constant time.
    pub fn verify_hash(&self, value: &Value, stored: &str, data_type: DataType) -> bool {
        let Some((salt_hex, expected)) = stored.split_once(':') else {
            return false;
        };
        if hex::decode(salt_hex).is_err() {
            return false;
        }
        let Some(canonical) = canonical_string(value) else {
            return false;
        };
        let computed = self.digest(&canonical, salt_hex);
        let matched: bool = computed.as_bytes().ct_eq(expected.as_bytes()).into();
        debug!(data_type = data_type.as_str(), matched, "hash verified");
        matched
    }

    fn digest(&self, canonical: &str, salt_hex: &str) -> String {
        match self.algorithm {
            HashAlgorithm::Sha256 => hex::encode(
                Sha256::new()
                    .chain_update(canonical.as_bytes())
                    .chain_update(salt_hex.as_bytes())
                    .chain_update(self.pepper.expose())
                    .finalize(),
            ),
            HashAlgorithm::Sha512 => hex::encode(
                Sha512::new()
                    .chain_update(canonical.as_bytes())
                    .chain_update(salt_hex.as_bytes())
                    .chain_update(self.pepper.expose())
                    .finalize(),
            ),
        }
    }
}
