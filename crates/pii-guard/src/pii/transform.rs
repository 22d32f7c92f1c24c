//! [`PiiTransformer`]: applies encryption, hashing, and tokenization to the
//! declared PII fields of a JSON record.

use std::sync::Arc;

use common::{CryptoError, CryptoResult, EncryptedData, PiiField};
use serde_json::Value;
use tracing::debug;

use super::lens::{FieldPath, Location};
use crate::crypto::CipherEngine;
use crate::hashing::Hasher;
use crate::tokenize::Tokenizer;

/// Suffix of the sibling field holding a value's hash.
pub const HASH_SUFFIX: &str = "_hash";

/// Suffix of the sibling field holding a value's token.
pub const TOKEN_SUFFIX: &str = "_token";

/// Walks a record's declared PII fields and protects each one.
#[derive(Clone)]
pub struct PiiTransformer {
    engine: CipherEngine,
    hasher: Arc<Hasher>,
    tokenizer: Arc<Tokenizer>,
}

impl PiiTransformer {
    pub fn new(engine: CipherEngine, hasher: Arc<Hasher>, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            engine,
            hasher,
            tokenizer,
        }
    }

    /// Return a copy of `record` with every declared field protected.
    ///
    /// For each value a field path reaches: the hash goes to `<name>_hash`,
    /// the token to `<name>_token` (both computed from the plaintext), and
    /// the value itself is replaced by its envelope. Absent and `null`
    /// values are skipped, as are values that already hold an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] if `record` is not an object or a
    /// field path is malformed, and propagates encryption errors. On error the
    /// input record is left as it was.
    pub async fn encrypt_pii(&self, record: &Value, fields: &[PiiField]) -> CryptoResult<Value> {
        let mut out = ensure_object(record)?.clone();
        for field in fields {
            let path = FieldPath::parse(&field.field_path)?;
            for location in path.locate(&out) {
                let Some(value) = location.get(&out).cloned() else {
                    continue;
                };
                if EncryptedData::from_json(&value).is_some() {
                    debug!(field = %location, "field already encrypted; skipped");
                    continue;
                }

                if field.hashing_required {
                    if let Some(hash) = self.hasher.hash_data(&value, field.data_type, None) {
                        write_sibling(&path, &location, &mut out, HASH_SUFFIX, hash)?;
                    }
                }
                if field.tokenization_required {
                    if let Some(token) = self.tokenizer.tokenize_data(&value, field.data_type) {
                        write_sibling(&path, &location, &mut out, TOKEN_SUFFIX, token)?;
                    }
                }
                if field.encryption_required {
                    let envelope = self.engine.encrypt(&value, field.classification()).await?;
                    if let Some(slot) = location.get_mut(&mut out) {
                        *slot = envelope.to_json();
                    }
                }
            }
        }
        Ok(out)
    }

    /// Return a copy of `record` with every encrypted field restored.
    ///
    /// Only fields marked `encryption_required` whose value is a recognisable
    /// envelope are touched. Hash and token siblings are left in place and
    /// never reversed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] if `record` is not an object or a
    /// field path is malformed, and propagates decryption errors.
    pub async fn decrypt_pii(&self, record: &Value, fields: &[PiiField]) -> CryptoResult<Value> {
        let mut out = ensure_object(record)?.clone();
        for field in fields.iter().filter(|f| f.encryption_required) {
            let path = FieldPath::parse(&field.field_path)?;
            for location in path.locate(&out) {
                let Some(envelope) = location.get(&out).and_then(EncryptedData::from_json) else {
                    continue;
                };
                let plaintext = self.engine.decrypt(&envelope).await?;
                if let Some(slot) = location.get_mut(&mut out) {
                    *slot = plaintext;
                }
            }
        }
        Ok(out)
    }
}

/// Store `value` as the `suffix` sibling of `location`. Paths without fan-out
/// address the sibling directly; fan-out paths go through the concrete location.
fn write_sibling(
    path: &FieldPath,
    location: &Location,
    out: &mut Value,
    suffix: &str,
    value: String,
) -> CryptoResult<()> {
    if path.has_fan_out() {
        location.set_sibling(out, suffix, Value::String(value))
    } else {
        path.with_suffix(suffix)?.set(out, Value::String(value))
    }
}

fn ensure_object(record: &Value) -> CryptoResult<&Value> {
    if record.is_object() {
        Ok(record)
    } else {
        Err(CryptoError::InvalidInput("PII records must be JSON objects".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashAlgorithm;
    use crate::keys::{Clock, KeyManager, KeyManagerSettings, KeyOptions, ManualClock, SecretBytes};
    use crate::store::{KeyStore, MemoryKeyStore};
    use common::{DataType, KeyPurpose, KeyType};
    use serde_json::json;

    async fn transformer() -> (PiiTransformer, Arc<Hasher>) {
        let keys = Arc::new(KeyManager::new(
            Arc::new(MemoryKeyStore::new()) as Arc<dyn KeyStore>,
            Arc::new(ManualClock::default()) as Arc<dyn Clock>,
            KeyManagerSettings::default(),
        ));
        keys.generate_key(KeyType::Symmetric, KeyPurpose::Encryption, KeyOptions::default())
            .await
            .unwrap();
        let pepper = SecretBytes::from("pepper".to_string());
        let hasher = Arc::new(Hasher::new(pepper.clone(), HashAlgorithm::Sha256, 32));
        let tokenizer = Arc::new(Tokenizer::new(&pepper).unwrap());
        (
            PiiTransformer::new(CipherEngine::new(keys), Arc::clone(&hasher), tokenizer),
            hasher,
        )
    }

    #[tokio::test]
    async fn nested_and_fan_out_fields_round_trip() {
        let (t, _) = transformer().await;
        let record = json!({
            "contact": {"email": "a@b.c"},
            "cards": [{"number": "4111"}, {"number": "5500"}],
            "note": "kept"
        });
        let fields = [
            PiiField::new("contact.email", DataType::Email).encrypted(),
            PiiField::new("cards[].number", DataType::CardNumber).encrypted(),
        ];
        let protected = t.encrypt_pii(&record, &fields).await.unwrap();
        assert!(EncryptedData::from_json(&protected["contact"]["email"]).is_some());
        assert!(EncryptedData::from_json(&protected["cards"][1]["number"]).is_some());
        assert_eq!(protected["note"], "kept");

        let restored = t.decrypt_pii(&protected, &fields).await.unwrap();
        assert_eq!(restored, record);
    }

    #[tokio::test]
    async fn absent_values_are_skipped() {
        let (t, _) = transformer().await;
        let record = json!({"name": null});
        let fields = [
            PiiField::new("name", DataType::Name).encrypted().hashed(),
            PiiField::new("missing.deep", DataType::Text).tokenized(),
        ];
        assert_eq!(t.encrypt_pii(&record, &fields).await.unwrap(), record);
    }

    #[tokio::test]
    async fn hash_and_token_siblings_use_plaintext() {
        let (t, hasher) = transformer().await;
        let record = json!({"email": "a@b.c"});
        let fields = [PiiField::new("email", DataType::Email).encrypted().hashed().tokenized()];
        let out = t.encrypt_pii(&record, &fields).await.unwrap();

        let hash = out["email_hash"].as_str().unwrap();
        assert!(hasher.verify_hash(&json!("a@b.c"), hash, DataType::Email));
        assert!(out["email_token"].as_str().unwrap().ends_with("@tokenized.local"));

        let restored = t.decrypt_pii(&out, &fields).await.unwrap();
        assert_eq!(restored["email"], "a@b.c");
        assert_eq!(restored["email_hash"], out["email_hash"]);
    }

    #[tokio::test]
    async fn nested_and_fan_out_siblings_sit_next_to_their_field() {
        let (t, hasher) = transformer().await;
        let record = json!({
            "contact": {"email": "a@b.c"},
            "cards": [{"number": "4111"}, {"number": "5500"}]
        });
        let fields = [
            PiiField::new("contact.email", DataType::Email).encrypted().hashed(),
            PiiField::new("cards[].number", DataType::CardNumber).hashed(),
        ];
        let out = t.encrypt_pii(&record, &fields).await.unwrap();

        let hash = out["contact"]["email_hash"].as_str().unwrap();
        assert!(hasher.verify_hash(&json!("a@b.c"), hash, DataType::Email));
        assert!(out.get("contact.email_hash").is_none());
        for (i, number) in ["4111", "5500"].into_iter().enumerate() {
            let hash = out["cards"][i]["number_hash"].as_str().unwrap();
            assert!(hasher.verify_hash(&json!(number), hash, DataType::CardNumber));
            assert_eq!(out["cards"][i]["number"], number);
        }
    }

    #[tokio::test]
    async fn encrypting_twice_does_not_double_wrap() {
        let (t, _) = transformer().await;
        let fields = [PiiField::new("email", DataType::Email).encrypted()];
        let once = t.encrypt_pii(&json!({"email": "a@b.c"}), &fields).await.unwrap();
        let twice = t.encrypt_pii(&once, &fields).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn non_object_records_and_bad_paths_are_rejected() {
        let (t, _) = transformer().await;
        let fields = [PiiField::new("email", DataType::Email).encrypted()];
        assert!(matches!(
            t.encrypt_pii(&json!(["a"]), &fields).await,
            Err(CryptoError::InvalidInput(_))
        ));
        let bad = [PiiField::new("a..b", DataType::Text).encrypted()];
        assert!(matches!(
            t.encrypt_pii(&json!({}), &bad).await,
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn plain_values_pass_through_decrypt() {
        let (t, _) = transformer().await;
        let fields = [PiiField::new("email", DataType::Email).encrypted()];
        let record = json!({"email": "not-encrypted"});
        assert_eq!(t.decrypt_pii(&record, &fields).await.unwrap(), record);
    }
}
