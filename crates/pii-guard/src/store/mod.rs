//! Durable persistence of key records.
//!
//! The key manager only talks to the [`KeyStore`] trait. Two adapters ship
//! with the crate:
//!
//! - [`MemoryKeyStore`]: process-local map, for tests and embedding.
//! - [`S3KeyStore`]: one JSON document per key under an S3 prefix, with
//!   optional KMS wrapping of the key material.
//!
//! Records are never deleted through this interface; retiring historical keys
//! is the job of a separate retention process.

pub mod memory;
pub mod s3;

pub use memory::MemoryKeyStore;
pub use s3::S3KeyStore;

use async_trait::async_trait;
use common::{CryptoError, EncryptionKey};
use thiserror::Error;

/// Errors produced by key store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service rejected or failed the call.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored document could not be decoded into a key record.
    #[error("malformed key record {id}: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for CryptoError {
    fn from(e: StoreError) -> Self {
        CryptoError::Storage(e.to_string())
    }
}

/// Persistence interface for [`EncryptionKey`] records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch a record by id. Returns `Ok(None)` if it does not exist.
    async fn get(&self, id: &str) -> Result<Option<EncryptionKey>, StoreError>;

    /// Insert or replace a record.
    async fn put(&self, key: &EncryptionKey) -> Result<(), StoreError>;

    /// Every record in the store, in no particular order.
    async fn list(&self) -> Result<Vec<EncryptionKey>, StoreError>;
}
