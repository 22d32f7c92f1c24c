//! [`CipherEngine`]: encrypts values into [`EncryptedData`] envelopes and back.

use std::sync::Arc;

use common::{
    Algorithm, Classification, CryptoError, CryptoResult, EncryptedData, EnvelopeMetadata, KeyId,
    PayloadFormat, ENVELOPE_VERSION,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::{asymmetric, symmetric, CipherError};
use crate::keys::{KeyManager, KeyMaterial, LoadedKey};

/// Per-call overrides for [`CipherEngine::encrypt_with`].
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Encrypt under this key instead of the active key for the classification.
    pub key_id: Option<KeyId>,
    /// Cipher to use; must run on the selected key's type.
    ///
    /// [`Algorithm::Aes256Cbc`] is unauthenticated: only the plaintext
    /// checksum protects it, which does not detect every modification. Prefer
    /// the default GCM unless a consumer cannot read it.
    pub algorithm: Option<Algorithm>,
}

/// Encrypts and decrypts payloads with keys from a [`KeyManager`].
#[derive(Clone)]
pub struct CipherEngine {
    keys: Arc<KeyManager>,
}

impl CipherEngine {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Encrypt a JSON value under the active key for `classification`.
    ///
    /// Strings are encrypted as their UTF-8 bytes; every other value is
    /// serialised to JSON first so it round-trips with its type intact.
    ///
    /// # Errors
    ///
    /// See [`encrypt_with`](Self::encrypt_with).
    pub async fn encrypt(
        &self,
        value: &Value,
        classification: Classification,
    ) -> CryptoResult<EncryptedData> {
        self.encrypt_with(value, classification, &EncryptOptions::default())
            .await
    }

    /// Encrypt a JSON value with explicit options.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidInput`] for `null`.
    /// - [`CryptoError::Configuration`] if no active key exists for the
    ///   classification's key type.
    /// - [`CryptoError::UnsupportedAlgorithm`] if the requested algorithm does
    ///   not run on the selected key.
    /// - Any key state or restriction error from the key manager.
    pub async fn encrypt_with(
        &self,
        value: &Value,
        classification: Classification,
        options: &EncryptOptions,
    ) -> CryptoResult<EncryptedData> {
        let (plaintext, format) = match value {
            Value::Null => return Err(CryptoError::InvalidInput("cannot encrypt null".into())),
            Value::String(s) => (s.as_bytes().to_vec(), PayloadFormat::Text),
            other => (
                serde_json::to_vec(other).map_err(|e| CryptoError::InvalidInput(e.to_string()))?,
                PayloadFormat::Json,
            ),
        };
        self.seal(&plaintext, format, classification, options).await
    }

    /// Encrypt raw bytes.
    ///
    /// # Errors
    ///
    /// See [`encrypt_with`](Self::encrypt_with).
    pub async fn encrypt_bytes(
        &self,
        plaintext: &[u8],
        classification: Classification,
        options: &EncryptOptions,
    ) -> CryptoResult<EncryptedData> {
        self.seal(plaintext, PayloadFormat::Binary, classification, options)
            .await
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyNotFound`] / [`CryptoError::KeyRevoked`] for an
    ///   unknown or revoked key.
    /// - [`CryptoError::UnsupportedAlgorithm`] for an unknown algorithm or one
    ///   that does not match the key.
    /// - [`CryptoError::Integrity`] if authentication or the checksum fails.
    /// - [`CryptoError::InvalidInput`] for binary envelopes (use
    ///   [`decrypt_bytes`](Self::decrypt_bytes)).
    pub async fn decrypt(&self, envelope: &EncryptedData) -> CryptoResult<Value> {
        let plaintext = self.open(envelope).await?;
        match envelope.metadata.format {
            PayloadFormat::Text => String::from_utf8(plaintext)
                .map(Value::String)
                .map_err(|_| CryptoError::Integrity("text payload is not valid UTF-8".into())),
            PayloadFormat::Json => serde_json::from_slice(&plaintext)
                .map_err(|_| CryptoError::Integrity("json payload does not parse".into())),
            PayloadFormat::Binary => Err(CryptoError::InvalidInput(
                "binary payload cannot be decoded as a value".into(),
            )),
        }
    }

    /// Decrypt an envelope to its raw plaintext bytes, whatever its format.
    ///
    /// # Errors
    ///
    /// See [`decrypt`](Self::decrypt).
    pub async fn decrypt_bytes(&self, envelope: &EncryptedData) -> CryptoResult<Vec<u8>> {
        self.open(envelope).await
    }

    async fn seal(
        &self,
        plaintext: &[u8],
        format: PayloadFormat,
        classification: Classification,
        options: &EncryptOptions,
    ) -> CryptoResult<EncryptedData> {
        let data_type = classification.data_type;
        let key = self
            .keys
            .key_for_encrypt(
                classification.sensitivity.key_type(),
                options.key_id.as_deref(),
                data_type,
            )
            .await?;
        let algorithm = match options.algorithm {
            Some(requested) => requested,
            None => key.record.algorithm()?,
        };
        ensure_matches(algorithm, &key)?;

        let (data, iv, tag) = match (algorithm, &key.material) {
            (Algorithm::Aes256Gcm, KeyMaterial::Symmetric(secret)) => {
                let sealed = symmetric::encrypt_gcm(plaintext, secret.expose())?;
                (
                    sealed.ciphertext,
                    Some(sealed.iv.to_vec()),
                    sealed.tag.map(|t| t.to_vec()),
                )
            }
            (Algorithm::Aes256Cbc, KeyMaterial::Symmetric(secret)) => {
                warn!(
                    key_id = %key.record.id,
                    data_type = data_type.as_str(),
                    "aes-256-cbc selected; ciphertext is not authenticated"
                );
                let sealed = symmetric::encrypt_cbc(plaintext, secret.expose())?;
                (sealed.ciphertext, Some(sealed.iv.to_vec()), None)
            }
            (Algorithm::RsaOaepSha256, KeyMaterial::Asymmetric { public, .. }) => {
                (asymmetric::seal(public, plaintext)?, None, None)
            }
            _ => return Err(mismatch(algorithm, &key)),
        };

        self.keys.record_usage(&key.record.id);
        debug!(
            key_id = %key.record.id,
            algorithm = algorithm.as_str(),
            data_type = data_type.as_str(),
            "payload encrypted"
        );

        Ok(EncryptedData {
            data,
            key_id: key.record.id.clone(),
            algorithm: algorithm.as_str().to_owned(),
            iv,
            tag,
            salt: None,
            metadata: EnvelopeMetadata {
                encrypted_at: self.keys.now(),
                data_type,
                version: ENVELOPE_VERSION,
                checksum: checksum(plaintext),
                format,
            },
        })
    }

    async fn open(&self, envelope: &EncryptedData) -> CryptoResult<Vec<u8>> {
        if envelope.metadata.version > ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "envelope version {}",
                envelope.metadata.version
            )));
        }
        let algorithm: Algorithm = envelope.algorithm.parse()?;
        let data_type = envelope.metadata.data_type;
        let key = self
            .keys
            .key_for_decrypt(&envelope.key_id, data_type)
            .await?;
        ensure_matches(algorithm, &key)?;

        let plaintext = decrypt_payload(algorithm, &key, envelope).map_err(|e| {
            warn!(
                key_id = %envelope.key_id,
                algorithm = algorithm.as_str(),
                error = %e,
                "decryption failed"
            );
            CryptoError::from(e)
        })?;

        let expected = envelope.metadata.checksum.as_bytes();
        if !bool::from(checksum(&plaintext).as_bytes().ct_eq(expected)) {
            warn!(key_id = %envelope.key_id, "plaintext checksum mismatch");
            return Err(CryptoError::Integrity("plaintext checksum mismatch".into()));
        }

        self.keys.record_usage(&key.record.id);
        debug!(
            key_id = %envelope.key_id,
            data_type = data_type.as_str(),
            "payload decrypted"
        );
        Ok(plaintext)
    }
}

fn decrypt_payload(
    algorithm: Algorithm,
    key: &LoadedKey,
    envelope: &EncryptedData,
) -> Result<Vec<u8>, CipherError> {
    match (algorithm, &key.material) {
        (Algorithm::Aes256Gcm, KeyMaterial::Symmetric(secret)) => {
            let iv = envelope.iv.as_deref().ok_or(CipherError::InvalidIv)?;
            let tag = envelope.tag.as_deref().ok_or(CipherError::InvalidTag)?;
            symmetric::decrypt_gcm(secret.expose(), iv, &envelope.data, tag)
        }
        (Algorithm::Aes256Cbc, KeyMaterial::Symmetric(secret)) => {
            let iv = envelope.iv.as_deref().ok_or(CipherError::InvalidIv)?;
            symmetric::decrypt_cbc(secret.expose(), iv, &envelope.data)
        }
        (Algorithm::RsaOaepSha256, KeyMaterial::Asymmetric { private, .. }) => {
            asymmetric::open(private, &envelope.data)
        }
        // Unreachable after `ensure_matches`.
        _ => Err(CipherError::Malformed("algorithm does not match key")),
    }
}

fn ensure_matches(algorithm: Algorithm, key: &LoadedKey) -> CryptoResult<()> {
    if algorithm.key_type() == key.record.key_type {
        Ok(())
    } else {
        Err(mismatch(algorithm, key))
    }
}

fn mismatch(algorithm: Algorithm, key: &LoadedKey) -> CryptoError {
    CryptoError::UnsupportedAlgorithm(format!(
        "{algorithm} cannot run on {} key {}",
        key.record.key_type.as_str(),
        key.record.id
    ))
}

/// Hex SHA-256 of the plaintext.
fn checksum(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Clock, KeyManagerSettings, KeyOptions, ManualClock};
    use crate::store::{KeyStore, MemoryKeyStore};
    use common::{DataType, KeyPurpose, KeyType, Sensitivity};
    use serde_json::json;

    async fn engine(with_rsa: bool) -> (CipherEngine, Arc<KeyManager>) {
        let keys = Arc::new(KeyManager::new(
            Arc::new(MemoryKeyStore::new()) as Arc<dyn KeyStore>,
            Arc::new(ManualClock::default()) as Arc<dyn Clock>,
            KeyManagerSettings::default(),
        ));
        keys.generate_key(KeyType::Symmetric, KeyPurpose::Encryption, KeyOptions::default())
            .await
            .unwrap();
        if with_rsa {
            keys.generate_key(KeyType::Asymmetric, KeyPurpose::Encryption, KeyOptions::default())
                .await
                .unwrap();
        }
        (CipherEngine::new(Arc::clone(&keys)), keys)
    }

    fn confidential(data_type: DataType) -> Classification {
        Classification::new(data_type, Sensitivity::Confidential)
    }

    fn restricted(data_type: DataType) -> Classification {
        Classification::new(data_type, Sensitivity::Restricted)
    }

    fn is_integrity(err: CryptoError) -> bool {
        matches!(err, CryptoError::Integrity(_))
    }

    #[tokio::test]
    async fn gcm_round_trip_for_text_and_json() {
        let (engine, _) = engine(false).await;
        for value in [
            json!("alice@example.com"),
            json!(""),
            json!({"street": "1 rue de la Paix", "zip": "75002"}),
            json!(42),
        ] {
            let env = engine.encrypt(&value, confidential(DataType::Address)).await.unwrap();
            assert_eq!(env.algorithm, "aes-256-gcm");
            assert_eq!(env.iv.as_ref().map(Vec::len), Some(16));
            assert_eq!(env.tag.as_ref().map(Vec::len), Some(16));
            assert_eq!(engine.decrypt(&env).await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn restricted_values_use_rsa_in_both_modes() {
        let (engine, _) = engine(true).await;
        let short = json!("FR7630006000011234567890189");
        let long = json!("x".repeat(1000));
        for value in [short, long] {
            let env = engine.encrypt(&value, restricted(DataType::Iban)).await.unwrap();
            assert_eq!(env.algorithm, "rsa-oaep-sha256");
            assert!(env.iv.is_none() && env.tag.is_none());
            assert_eq!(engine.decrypt(&env).await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn binary_payloads_round_trip() {
        let (engine, _) = engine(false).await;
        let bytes = vec![0u8, 159, 146, 150, 255];
        let env = engine
            .encrypt_bytes(&bytes, confidential(DataType::Text), &EncryptOptions::default())
            .await
            .unwrap();
        assert_eq!(env.metadata.format, PayloadFormat::Binary);
        assert_eq!(engine.decrypt_bytes(&env).await.unwrap(), bytes);
        assert!(matches!(
            engine.decrypt(&env).await,
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn flipping_any_ciphertext_bit_fails_integrity() {
        let (engine, _) = engine(false).await;
        let env = engine
            .encrypt(&json!("4111111111111111"), confidential(DataType::CardNumber))
            .await
            .unwrap();
        for byte in 0..env.data.len() {
            let mut tampered = env.clone();
            tampered.data[byte] ^= 0x01;
            assert!(is_integrity(engine.decrypt(&tampered).await.unwrap_err()));
        }
        for byte in 0..16 {
            let mut tampered = env.clone();
            if let Some(tag) = tampered.tag.as_mut() {
                tag[byte] ^= 0x80;
            }
            assert!(is_integrity(engine.decrypt(&tampered).await.unwrap_err()));
        }
    }

    #[tokio::test]
    async fn missing_iv_or_tag_fails_closed() {
        let (engine, _) = engine(false).await;
        let env = engine.encrypt(&json!("x"), confidential(DataType::Text)).await.unwrap();

        let mut no_tag = env.clone();
        no_tag.tag = None;
        assert!(is_integrity(engine.decrypt(&no_tag).await.unwrap_err()));

        let mut no_iv = env;
        no_iv.iv = None;
        assert!(is_integrity(engine.decrypt(&no_iv).await.unwrap_err()));
    }

    #[tokio::test]
    async fn altered_checksum_alone_fails_decrypt() {
        let (engine, _) = engine(true).await;
        for classification in [confidential(DataType::Email), restricted(DataType::Email)] {
            let mut env = engine.encrypt(&json!("bob@example.com"), classification).await.unwrap();
            env.metadata.checksum = checksum(b"mallory@example.com");
            assert!(is_integrity(engine.decrypt(&env).await.unwrap_err()));
        }
    }

    #[tokio::test]
    async fn cbc_is_opt_in_and_checked_by_checksum() {
        let (engine, _) = engine(false).await;
        let options = EncryptOptions {
            algorithm: Some(Algorithm::Aes256Cbc),
            ..EncryptOptions::default()
        };
        let env = engine
            .encrypt_with(&json!("legacy"), confidential(DataType::Name), &options)
            .await
            .unwrap();
        assert_eq!(env.algorithm, "aes-256-cbc");
        assert!(env.tag.is_none());
        assert_eq!(engine.decrypt(&env).await.unwrap(), json!("legacy"));

        let mut tampered = env;
        tampered.metadata.checksum = checksum(b"other");
        assert!(is_integrity(engine.decrypt(&tampered).await.unwrap_err()));
    }

    #[tokio::test]
    async fn algorithm_must_fit_the_key() {
        let (engine, _) = engine(false).await;
        let options = EncryptOptions {
            algorithm: Some(Algorithm::RsaOaepSha256),
            ..EncryptOptions::default()
        };
        let err = engine
            .encrypt_with(&json!("x"), confidential(DataType::Text), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));

        let mut env = engine.encrypt(&json!("x"), confidential(DataType::Text)).await.unwrap();
        env.algorithm = "rsa-oaep-sha256".into();
        assert!(matches!(
            engine.decrypt(&env).await,
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
        env.algorithm = "chacha20-poly1305".into();
        assert!(matches!(
            engine.decrypt(&env).await,
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn missing_active_key_is_a_configuration_error() {
        let (engine, _) = engine(false).await;
        let err = engine
            .encrypt(&json!("x"), restricted(DataType::Passport))
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Configuration(_)));
        assert!(matches!(
            engine.encrypt(&Value::Null, confidential(DataType::Text)).await,
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn rotated_key_still_decrypts_old_envelopes() {
        let (engine, keys) = engine(false).await;
        let env = engine.encrypt(&json!("before"), confidential(DataType::Email)).await.unwrap();
        let new = keys.rotate_key(&env.key_id).await.unwrap();

        assert_eq!(engine.decrypt(&env).await.unwrap(), json!("before"));
        let after = engine.encrypt(&json!("after"), confidential(DataType::Email)).await.unwrap();
        assert_eq!(after.key_id, new.id);
    }

    #[tokio::test]
    async fn revoked_key_blocks_both_directions() {
        let (engine, keys) = engine(false).await;
        let env = engine.encrypt(&json!("x"), confidential(DataType::Email)).await.unwrap();
        keys.revoke_key(&env.key_id, "compromised").await.unwrap();

        assert!(matches!(
            engine.decrypt(&env).await,
            Err(CryptoError::KeyRevoked(_))
        ));
        let pinned = EncryptOptions {
            key_id: Some(env.key_id.clone()),
            ..EncryptOptions::default()
        };
        assert!(matches!(
            engine
                .encrypt_with(&json!("y"), confidential(DataType::Email), &pinned)
                .await,
            Err(CryptoError::KeyRevoked(_))
        ));
    }

    #[tokio::test]
    async fn usage_is_counted_per_operation() {
        let (engine, keys) = engine(false).await;
        let env = engine.encrypt(&json!("x"), confidential(DataType::Text)).await.unwrap();
        engine.decrypt(&env).await.unwrap();
        keys.flush_usage().await;
        let info = keys.get_key_info(&env.key_id).await.unwrap();
        assert_eq!(info.metadata.usage_count, 2);
    }
}
