//! [`MemoryKeyStore`]: process-local key store.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{EncryptionKey, KeyId};
use tokio::sync::RwLock;

use super::{KeyStore, StoreError};

/// Key store backed by an in-memory map. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    inner: RwLock<HashMap<KeyId, EncryptionKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, id: &str) -> Result<Option<EncryptionKey>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn put(&self, key: &EncryptionKey) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EncryptionKey>, StoreError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{KeyMetadata, KeyPurpose, KeyStatus, KeyType};

    fn record(id: &str) -> EncryptionKey {
        EncryptionKey {
            id: id.into(),
            key_type: KeyType::Symmetric,
            algorithm: "aes-256-gcm".into(),
            key_data: vec![0u8; 32],
            public_key: None,
            purpose: KeyPurpose::Encryption,
            status: KeyStatus::Active,
            metadata: KeyMetadata::new(Utc::now(), 1),
            restrictions: None,
        }
    }

    #[tokio::test]
    async fn initially_empty() {
        let store = MemoryKeyStore::new();
        assert!(store.is_empty().await);
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing_record() {
        let store = MemoryKeyStore::new();
        let mut key = record("k1");
        store.put(&key).await.unwrap();
        key.status = KeyStatus::Deprecated;
        store.put(&key).await.unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.status, KeyStatus::Deprecated);
    }

    #[tokio::test]
    async fn list_returns_every_record() {
        let store = MemoryKeyStore::new();
        store.put(&record("a")).await.unwrap();
        store.put(&record("b")).await.unwrap();
        let mut ids: Vec<_> = store.list().await.unwrap().into_iter().map(|k| k.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
