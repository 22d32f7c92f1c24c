//! Fresh key material and key records.

use chrono::{DateTime, Utc};
use common::{
    Algorithm, CryptoError, EncryptionKey, KeyMetadata, KeyPurpose, KeyRestrictions, KeyStatus,
    KeyType,
};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey,
};
use uuid::Uuid;

use super::material::{KeyMaterial, SecretBytes};
use crate::crypto::KEY_LEN;

/// Smallest RSA modulus accepted for new keys.
pub const MIN_RSA_BITS: usize = 2048;

/// Caller-supplied overrides for [`KeyManager::generate_key`](super::KeyManager::generate_key).
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    /// Algorithm recorded on the key; defaults per key type.
    pub algorithm: Option<Algorithm>,
    /// Key size in bits: must be 256 for AES, at least 2048 for RSA.
    pub key_bits: Option<usize>,
    pub restrictions: Option<KeyRestrictions>,
}

/// Everything needed to build a new record besides randomness.
pub(crate) struct KeySpec {
    pub key_type: KeyType,
    pub purpose: KeyPurpose,
    pub options: KeyOptions,
    pub version: u32,
    pub now: DateTime<Utc>,
}

/// Random identifier, prefixed by key type for readability in logs.
pub(crate) fn new_key_id(key_type: KeyType) -> String {
    let prefix = match key_type {
        KeyType::Symmetric => "sym",
        KeyType::Asymmetric => "rsa",
    };
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Generate a new key record and its decoded material.
///
/// RSA generation runs on the blocking thread pool so the runtime's reactor
/// threads stay responsive.
///
/// # Errors
///
/// Returns [`CryptoError::UnsupportedAlgorithm`] if the requested algorithm or
/// key size does not fit the key type.
pub(crate) async fn generate(
    spec: KeySpec,
    default_rsa_bits: usize,
) -> Result<(EncryptionKey, KeyMaterial), CryptoError> {
    let algorithm = spec
        .options
        .algorithm
        .unwrap_or_else(|| Algorithm::default_for(spec.key_type));
    if algorithm.key_type() != spec.key_type {
        return Err(CryptoError::UnsupportedAlgorithm(format!(
            "{algorithm} cannot be used with {} keys",
            spec.key_type.as_str()
        )));
    }

    let mut metadata = KeyMetadata::new(spec.now, spec.version);

    let (key_data, public_key, material) = match spec.key_type {
        KeyType::Symmetric => {
            let bits = spec.options.key_bits.unwrap_or(KEY_LEN * 8);
            if bits != KEY_LEN * 8 {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "{algorithm} requires {}-bit keys, got {bits}",
                    KEY_LEN * 8
                )));
            }
            let mut key = vec![0u8; KEY_LEN];
            OsRng.fill_bytes(&mut key);
            let material = KeyMaterial::Symmetric(SecretBytes::new(key.clone()));
            (key, None, material)
        }
        KeyType::Asymmetric => {
            let bits = spec.options.key_bits.unwrap_or(default_rsa_bits);
            if bits < MIN_RSA_BITS {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "RSA modulus must be at least {MIN_RSA_BITS} bits, got {bits}"
                )));
            }
            let private = tokio::task::spawn_blocking(move || RsaPrivateKey::new(&mut OsRng, bits))
                .await
                .map_err(|e| CryptoError::Configuration(format!("key generation task failed: {e}")))?
                .map_err(|e| CryptoError::Configuration(format!("RSA key generation failed: {e}")))?;

            let der = private
                .to_pkcs8_der()
                .map_err(|e| CryptoError::Configuration(format!("PKCS#8 export failed: {e}")))?;
            let public = private.to_public_key();
            let pem = public
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| CryptoError::Configuration(format!("public key export failed: {e}")))?;

            metadata.modulus_bits = Some(bits);
            let material = KeyMaterial::Asymmetric {
                private: Box::new(private),
                public,
            };
            (der.as_bytes().to_vec(), Some(pem), material)
        }
    };

    let record = EncryptionKey {
        id: new_key_id(spec.key_type),
        key_type: spec.key_type,
        algorithm: algorithm.as_str().to_owned(),
        key_data,
        public_key,
        purpose: spec.purpose,
        status: KeyStatus::Active,
        metadata,
        restrictions: spec.options.restrictions,
    };
    Ok((record, material))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key_type: KeyType, options: KeyOptions) -> KeySpec {
        KeySpec {
            key_type,
            purpose: KeyPurpose::Encryption,
            options,
            version: 1,
            now: Utc::now(),
        }
    }

    #[test]
    fn key_ids_are_prefixed_and_unique() {
        let a = new_key_id(KeyType::Symmetric);
        let b = new_key_id(KeyType::Symmetric);
        assert!(a.starts_with("sym_"));
        assert!(new_key_id(KeyType::Asymmetric).starts_with("rsa_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn symmetric_key_defaults_to_aes_256_gcm() {
        let (record, material) = generate(spec(KeyType::Symmetric, KeyOptions::default()), 2048)
            .await
            .unwrap();
        assert_eq!(record.algorithm, "aes-256-gcm");
        assert_eq!(record.key_data.len(), KEY_LEN);
        assert_eq!(record.status, KeyStatus::Active);
        assert!(record.public_key.is_none());
        assert!(matches!(material, KeyMaterial::Symmetric(_)));
    }

    #[tokio::test]
    async fn symmetric_key_rejects_other_sizes() {
        let options = KeyOptions {
            key_bits: Some(128),
            ..KeyOptions::default()
        };
        let err = generate(spec(KeyType::Symmetric, options), 2048)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn algorithm_must_match_key_type() {
        let options = KeyOptions {
            algorithm: Some(Algorithm::RsaOaepSha256),
            ..KeyOptions::default()
        };
        assert!(generate(spec(KeyType::Symmetric, options), 2048)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rsa_key_exports_pkcs8_and_pem() {
        let (record, material) = generate(spec(KeyType::Asymmetric, KeyOptions::default()), 2048)
            .await
            .unwrap();
        assert_eq!(record.algorithm, "rsa-oaep-sha256");
        assert_eq!(record.metadata.modulus_bits, Some(2048));
        let pem = record.public_key.as_deref().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        // The stored DER must decode back to the same key pair.
        let reloaded = KeyMaterial::from_record(&record).unwrap();
        match (material, reloaded) {
            (
                KeyMaterial::Asymmetric { public: a, .. },
                KeyMaterial::Asymmetric { public: b, .. },
            ) => assert_eq!(a, b),
            _ => panic!("expected asymmetric material"),
        }
    }

    #[tokio::test]
    async fn rsa_key_rejects_small_modulus() {
        let options = KeyOptions {
            key_bits: Some(1024),
            ..KeyOptions::default()
        };
        assert!(generate(spec(KeyType::Asymmetric, options), 2048)
            .await
            .is_err());
    }
}
