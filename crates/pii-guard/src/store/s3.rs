//! [`S3KeyStore`]: key records as JSON documents in S3.
//!
//! Each record lives at `<prefix><key id>.json`. When a KMS key is
//! configured, `keyData` is replaced by its KMS ciphertext before upload and
//! unwrapped on read, so the bucket never holds usable key material.

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use common::EncryptionKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{KeyStore, StoreError};
use crate::aws::AwsClients;

/// On-disk document: the record plus how its key material is wrapped.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKey {
    #[serde(flatten)]
    record: EncryptionKey,
    /// KMS key id that wrapped `keyData`; absent when stored unwrapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wrapped_by: Option<String>,
}

/// Key store backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3KeyStore {
    s3: aws_sdk_s3::Client,
    kms: aws_sdk_kms::Client,
    bucket: String,
    prefix: String,
    wrap_key_id: Option<String>,
}

impl S3KeyStore {
    pub fn new(
        aws: &AwsClients,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        wrap_key_id: Option<String>,
    ) -> Self {
        Self {
            s3: aws.s3.clone(),
            kms: aws.kms.clone(),
            bucket: bucket.into(),
            prefix: prefix.into(),
            wrap_key_id,
        }
    }

    fn object_key(&self, id: &str) -> String {
        object_key(&self.prefix, id)
    }

    async fn wrap_material(&self, mut record: EncryptionKey) -> Result<StoredKey, StoreError> {
        let Some(kms_key_id) = &self.wrap_key_id else {
            return Ok(StoredKey {
                record,
                wrapped_by: None,
            });
        };
        let resp = self
            .kms
            .encrypt()
            .key_id(kms_key_id)
            .plaintext(Blob::new(record.key_data.clone()))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("KMS encrypt failed: {}", DisplayErrorContext(&e))))?;
        let ciphertext = resp
            .ciphertext_blob()
            .ok_or_else(|| StoreError::Backend("KMS encrypt returned no ciphertext".into()))?;
        record.key_data = ciphertext.as_ref().to_vec();
        Ok(StoredKey {
            record,
            wrapped_by: Some(kms_key_id.clone()),
        })
    }

    async fn unwrap_material(&self, stored: StoredKey) -> Result<EncryptionKey, StoreError> {
        let StoredKey {
            mut record,
            wrapped_by,
        } = stored;
        let Some(kms_key_id) = wrapped_by else {
            return Ok(record);
        };
        let resp = self
            .kms
            .decrypt()
            .key_id(&kms_key_id)
            .ciphertext_blob(Blob::new(std::mem::take(&mut record.key_data)))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("KMS decrypt failed: {}", DisplayErrorContext(&e))))?;
        let plaintext = resp
            .plaintext()
            .ok_or_else(|| StoreError::Backend("KMS decrypt returned no plaintext".into()))?;
        record.key_data = plaintext.as_ref().to_vec();
        Ok(record)
    }

    async fn fetch(&self, object_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = match self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(StoreError::Backend(format!(
                    "failed to fetch {object_key}: {}",
                    DisplayErrorContext(&service_error)
                )));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to read body of {object_key}: {e}")))?
            .into_bytes();
        Ok(Some(body.to_vec()))
    }

    async fn decode(&self, id: &str, bytes: &[u8]) -> Result<EncryptionKey, StoreError> {
        let stored: StoredKey = serde_json::from_slice(bytes).map_err(|source| StoreError::Malformed {
            id: id.to_owned(),
            source,
        })?;
        self.unwrap_material(stored).await
    }
}

#[async_trait]
impl KeyStore for S3KeyStore {
    async fn get(&self, id: &str) -> Result<Option<EncryptionKey>, StoreError> {
        match self.fetch(&self.object_key(id)).await? {
            Some(bytes) => self.decode(id, &bytes).await.map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &EncryptionKey) -> Result<(), StoreError> {
        let stored = self.wrap_material(key.clone()).await?;
        let body = serde_json::to_vec(&stored).map_err(|source| StoreError::Malformed {
            id: key.id.clone(),
            source,
        })?;
        let object_key = self.object_key(&key.id);
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "failed to write {object_key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        debug!(key_id = %key.id, "key record written to S3");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EncryptionKey>, StoreError> {
        let mut records = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .s3
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    StoreError::Backend(format!(
                        "failed to list key records: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            for obj in page.contents() {
                let Some(object_key) = obj.key() else { continue };
                let Some(id) = key_id_from_object_key(object_key, &self.prefix) else {
                    continue;
                };
                if let Some(bytes) = self.fetch(object_key).await? {
                    records.push(self.decode(id, &bytes).await?);
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(records)
    }
}

fn object_key(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}.json")
}

/// Derive a key id from an S3 object key, ignoring anything that is not a
/// direct `<prefix><id>.json` child.
fn key_id_from_object_key<'a>(object_key: &'a str, prefix: &str) -> Option<&'a str> {
    let id = object_key.strip_prefix(prefix)?.strip_suffix(".json")?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{KeyMetadata, KeyPurpose, KeyStatus, KeyType};

    #[test]
    fn object_key_layout() {
        assert_eq!(object_key("keys/", "sym_1"), "keys/sym_1.json");
    }

    #[test]
    fn key_id_strips_prefix_and_extension() {
        assert_eq!(key_id_from_object_key("keys/sym_1.json", "keys/"), Some("sym_1"));
        assert_eq!(key_id_from_object_key("keys/nested/x.json", "keys/"), None);
        assert_eq!(key_id_from_object_key("keys/readme.txt", "keys/"), None);
        assert_eq!(key_id_from_object_key("other/sym_1.json", "keys/"), None);
    }

    #[test]
    fn stored_document_flattens_the_record() {
        let stored = StoredKey {
            record: EncryptionKey {
                id: "sym_1".into(),
                key_type: KeyType::Symmetric,
                algorithm: "aes-256-gcm".into(),
                key_data: vec![1u8; 32],
                public_key: None,
                purpose: KeyPurpose::Encryption,
                status: KeyStatus::Active,
                metadata: KeyMetadata::new(Utc::now(), 1),
                restrictions: None,
            },
            wrapped_by: Some("alias/pii-keys".into()),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], "sym_1");
        assert_eq!(json["type"], "symmetric");
        assert_eq!(json["wrappedBy"], "alias/pii-keys");

        let back: StoredKey = serde_json::from_value(json).unwrap();
        assert_eq!(back.record.key_data, vec![1u8; 32]);
        assert_eq!(back.wrapped_by.as_deref(), Some("alias/pii-keys"));
    }
}
