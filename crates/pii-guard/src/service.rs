//! [`DataProtection`]: the single entry point applications hold.
//!
//! Wires a [`KeyManager`], [`CipherEngine`], [`Hasher`], [`Tokenizer`], and
//! [`PiiTransformer`] together from one [`Config`], a [`KeyStore`], and a
//! [`Clock`]. Cloning is cheap; every clone shares the same keys.

use std::sync::Arc;

use common::{
    Classification, CryptoError, CryptoResult, DataType, EncryptedData, KeyInfo, KeyPurpose,
    KeyType, PiiField,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::crypto::{CipherEngine, EncryptOptions};
use crate::hashing::{HashAlgorithm, Hasher};
use crate::keys::{rotation_task, Clock, KeyManager, KeyManagerSettings, KeyOptions};
use crate::pii::PiiTransformer;
use crate::store::KeyStore;
use crate::tokenize::Tokenizer;

#[derive(Clone)]
pub struct DataProtection {
    keys: Arc<KeyManager>,
    engine: CipherEngine,
    hasher: Arc<Hasher>,
    tokenizer: Arc<Tokenizer>,
    transformer: PiiTransformer,
    rotation_interval: std::time::Duration,
    bootstrap_keys: bool,
}

impl DataProtection {
    /// Build the service. No store I/O happens until [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Configuration`] if the pepper is missing or
    /// empty, and [`CryptoError::UnsupportedAlgorithm`] for an unknown hash
    /// algorithm.
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
    ) -> CryptoResult<Self> {
        let pepper = config
            .hash_pepper
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CryptoError::Configuration("hash pepper is not configured".into()))?;
        let algorithm: HashAlgorithm = config.hash_algorithm.parse()?;
        let token_secret = config.token_secret.clone().unwrap_or_else(|| pepper.clone());

        let keys = Arc::new(KeyManager::new(
            store,
            clock,
            KeyManagerSettings::from(config),
        ));
        let engine = CipherEngine::new(Arc::clone(&keys));
        let hasher = Arc::new(Hasher::new(pepper, algorithm, config.hash_salt_len));
        let tokenizer = Arc::new(Tokenizer::new(&token_secret)?);
        let transformer =
            PiiTransformer::new(engine.clone(), Arc::clone(&hasher), Arc::clone(&tokenizer));

        Ok(Self {
            keys,
            engine,
            hasher,
            tokenizer,
            transformer,
            rotation_interval: config.rotation_check_interval(),
            bootstrap_keys: config.bootstrap_keys,
        })
    }

    /// Load the key index and, if configured, bootstrap missing encryption keys.
    ///
    /// # Errors
    ///
    /// Propagates store and key generation failures.
    pub async fn initialize(&self) -> CryptoResult<()> {
        self.keys.initialize(self.bootstrap_keys).await?;
        info!(hash_algorithm = %self.hasher.algorithm(), "data protection initialised");
        Ok(())
    }

    /// Start the background rotation task. It stops when `shutdown` is cancelled.
    pub fn spawn_rotation(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        rotation_task(Arc::clone(&self.keys), self.rotation_interval, shutdown)
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    // -----------------------------------------------------------------------
    // Encryption
    // -----------------------------------------------------------------------

    pub async fn encrypt(
        &self,
        value: &Value,
        classification: Classification,
    ) -> CryptoResult<EncryptedData> {
        self.engine.encrypt(value, classification).await
    }

    pub async fn encrypt_with(
        &self,
        value: &Value,
        classification: Classification,
        options: &EncryptOptions,
    ) -> CryptoResult<EncryptedData> {
        self.engine.encrypt_with(value, classification, options).await
    }

    pub async fn decrypt(&self, envelope: &EncryptedData) -> CryptoResult<Value> {
        self.engine.decrypt(envelope).await
    }

    pub async fn encrypt_pii(&self, record: &Value, fields: &[PiiField]) -> CryptoResult<Value> {
        self.transformer.encrypt_pii(record, fields).await
    }

    pub async fn decrypt_pii(&self, record: &Value, fields: &[PiiField]) -> CryptoResult<Value> {
        self.transformer.decrypt_pii(record, fields).await
    }

    // -----------------------------------------------------------------------
    // Hashing and tokenization
    // -----------------------------------------------------------------------

    /// `"<salt hex>:<digest hex>"` for `value`, or `None` for `null`.
    pub fn hash_data(&self, value: &Value, data_type: DataType) -> Option<String> {
        self.hasher.hash_data(value, data_type, None)
    }

    pub fn verify_hash(&self, value: &Value, stored: &str, data_type: DataType) -> bool {
        self.hasher.verify_hash(value, stored, data_type)
    }

    pub fn tokenize_data(&self, value: &Value, data_type: DataType) -> Option<String> {
        self.tokenizer.tokenize_data(value, data_type)
    }

    // -----------------------------------------------------------------------
    // Key administration (metadata only)
    // -----------------------------------------------------------------------

    pub async fn generate_key(
        &self,
        key_type: KeyType,
        purpose: KeyPurpose,
        options: KeyOptions,
    ) -> CryptoResult<KeyInfo> {
        Ok(self.keys.generate_key(key_type, purpose, options).await?.info())
    }

    /// Rotate `key_id`, returning the replacement key.
    pub async fn rotate_key(&self, key_id: &str) -> CryptoResult<KeyInfo> {
        Ok(self.keys.rotate_key(key_id).await?.info())
    }

    pub async fn revoke_key(&self, key_id: &str, reason: &str) -> CryptoResult<()> {
        self.keys.revoke_key(key_id, reason).await
    }

    pub async fn get_key_info(&self, key_id: &str) -> CryptoResult<KeyInfo> {
        self.keys.get_key_info(key_id).await
    }

    pub async fn list_keys(&self) -> CryptoResult<Vec<KeyInfo>> {
        self.keys.list_keys().await
    }
}
