//! [`KeyManager`]: generation, lookup, rotation, and revocation of key records.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use common::{
    CryptoError, CryptoResult, DataType, EncryptionKey, KeyId, KeyInfo, KeyOperation, KeyPurpose,
    KeyStatus, KeyType,
};
use tracing::{debug, info, warn};

use super::cache::KeyCache;
use super::clock::Clock;
use super::generate::{self, KeyOptions, KeySpec};
use super::material::LoadedKey;
use crate::config::Config;
use crate::store::{KeyStore, StoreError};

/// Tunables for [`KeyManager`].
#[derive(Debug, Clone)]
pub struct KeyManagerSettings {
    /// Age at which an active key is rotated by the background scan.
    pub rotation_period: chrono::Duration,
    pub cache_capacity: usize,
    /// Deadline applied to every key store call.
    pub store_timeout: Duration,
    /// Modulus size for new RSA keys when the caller does not pick one.
    pub rsa_modulus_bits: usize,
    /// How long a store listing stays authoritative for "no active key".
    pub index_refresh_interval: Duration,
}

const INDEX_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

impl Default for KeyManagerSettings {
    fn default() -> Self {
        Self {
            rotation_period: chrono::Duration::days(90),
            cache_capacity: 100,
            store_timeout: Duration::from_secs(5),
            rsa_modulus_bits: 2048,
            index_refresh_interval: INDEX_REFRESH_INTERVAL,
        }
    }
}

impl From<&Config> for KeyManagerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            rotation_period: cfg.rotation_period(),
            cache_capacity: cfg.key_cache_capacity,
            store_timeout: cfg.key_store_timeout(),
            rsa_modulus_bits: cfg.rsa_modulus_bits,
            index_refresh_interval: INDEX_REFRESH_INTERVAL,
        }
    }
}

/// Outcome of one background rotation scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// `(old key id, new key id)` for every successful rotation.
    pub rotated: Vec<(KeyId, KeyId)>,
    /// Keys whose rotation failed; they stay active until the next scan.
    pub failed: Vec<KeyId>,
    /// Active keys superseded by a newer key of the same pair, now deprecated.
    pub deprecated: Vec<KeyId>,
}

/// The current encryption key for each `(type, purpose)` pair.
type ActiveIndex = HashMap<(KeyType, KeyPurpose), KeyId>;

#[derive(Debug, Clone, Copy)]
struct UsageDelta {
    count: u64,
    last_used: DateTime<Utc>,
}

/// Owns the lifecycle of every [`EncryptionKey`].
///
/// The store is the source of truth. Decoded key material is served from a
/// bounded LRU cache, and the active key for each `(type, purpose)` pair is
/// tracked in an index that is swapped atomically, so readers never observe
/// zero or two active keys while a rotation is in flight.
///
/// Rotation, revocation, and usage flushing are serialised on one lock within
/// a process. Cache fills run under the read half of a second lock whose
/// write half covers every status change, so a fill that raced a revocation
/// cannot put the stale record back into the cache.
///
/// Separate processes are not coordinated: rotation re-reads the record and
/// skips keys that are no longer active, which narrows but does not close the
/// window in which two instances rotate the same key. A manager that found no
/// active key for a pair trusts that answer for `index_refresh_interval`, so
/// keys created by another instance show up within that interval.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    settings: KeyManagerSettings,
    cache: KeyCache,
    active: ArcSwap<ActiveIndex>,
    usage: Mutex<HashMap<KeyId, UsageDelta>>,
    lifecycle: tokio::sync::Mutex<()>,
    fill: tokio::sync::RwLock<()>,
    index_refreshed: Mutex<Option<tokio::time::Instant>>,
}

impl KeyManager {
    pub fn new(
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        settings: KeyManagerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            cache: KeyCache::new(settings.cache_capacity),
            settings,
            active: ArcSwap::from_pointee(ActiveIndex::new()),
            usage: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            fill: tokio::sync::RwLock::new(()),
            index_refreshed: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &KeyManagerSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Build the active-key index from the store and, when `bootstrap` is
    /// set, create an encryption key for every key type that has none.
    ///
    /// # Errors
    ///
    /// Propagates store failures and key generation failures.
    pub async fn initialize(&self, bootstrap: bool) -> CryptoResult<()> {
        let records = self.with_timeout(self.store.list()).await?;
        self.rebuild_index(&records);
        info!(keys = records.len(), "key index loaded");

        if !bootstrap {
            return Ok(());
        }
        for key_type in [KeyType::Symmetric, KeyType::Asymmetric] {
            if self.active_id(key_type, KeyPurpose::Encryption).is_none() {
                let key = self
                    .generate_key(key_type, KeyPurpose::Encryption, KeyOptions::default())
                    .await?;
                info!(key_id = %key.id, key_type = key_type.as_str(), "bootstrapped encryption key");
            }
        }
        Ok(())
    }

    /// Generate, persist, and activate a new key.
    ///
    /// The new key becomes the active key for its `(type, purpose)` pair and
    /// any previously active key of that pair is deprecated. If deprecating
    /// fails, the next rotation scan finishes the job.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedAlgorithm`] for an algorithm or size
    /// that does not fit `key_type`, and propagates store failures.
    pub async fn generate_key(
        &self,
        key_type: KeyType,
        purpose: KeyPurpose,
        options: KeyOptions,
    ) -> CryptoResult<EncryptionKey> {
        let spec = KeySpec {
            key_type,
            purpose,
            options,
            version: 1,
            now: self.clock.now(),
        };
        let (record, material) = generate::generate(spec, self.settings.rsa_modulus_bits).await?;

        let _guard = self.lifecycle.lock().await;
        self.with_timeout(self.store.put(&record)).await?;
        self.cache
            .insert(Arc::new(LoadedKey::new(record.clone(), material)))
            .await;
        self.set_active(key_type, purpose, Some(record.id.clone()));
        if let Err(e) = self.retire_superseded(&record).await {
            warn!(key_id = %record.id, error = %e, "previous active key not deprecated");
        }

        info!(
            key_id = %record.id,
            key_type = key_type.as_str(),
            algorithm = %record.algorithm,
            "key generated"
        );
        Ok(record)
    }

    /// The newest active encryption key of `key_type`, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_active_key_for_type(
        &self,
        key_type: KeyType,
    ) -> CryptoResult<Option<EncryptionKey>> {
        Ok(self
            .active_loaded(key_type, KeyPurpose::Encryption)
            .await?
            .map(|k| k.record.clone()))
    }

    /// Resolve and check the key for a new encryption.
    ///
    /// With `key_id` set, that key is used regardless of `key_type`; otherwise
    /// the active encryption key of `key_type` is selected.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Configuration`] if no active key exists for `key_type`.
    /// - [`CryptoError::KeyNotFound`] if a pinned key does not exist.
    /// - [`CryptoError::KeyRevoked`] / [`CryptoError::InvalidKeyState`] if the
    ///   key may not encrypt.
    /// - [`CryptoError::KeyRestricted`] if a restriction forbids the call.
    pub async fn key_for_encrypt(
        &self,
        key_type: KeyType,
        key_id: Option<&str>,
        data_type: DataType,
    ) -> CryptoResult<Arc<LoadedKey>> {
        let key = match key_id {
            Some(id) => self.load(id).await?,
            None => self
                .active_loaded(key_type, KeyPurpose::Encryption)
                .await?
                .ok_or_else(|| {
                    CryptoError::Configuration(format!(
                        "no active {} encryption key",
                        key_type.as_str()
                    ))
                })?,
        };

        let record = &key.record;
        match record.status {
            KeyStatus::Revoked => return Err(CryptoError::KeyRevoked(record.id.clone())),
            status if !status.can_encrypt() => {
                return Err(CryptoError::InvalidKeyState {
                    key_id: record.id.clone(),
                    status: status.to_string(),
                    reason: "only active keys may encrypt".into(),
                })
            }
            _ => {}
        }
        if record.purpose != KeyPurpose::Encryption {
            return Err(CryptoError::KeyRestricted {
                key_id: record.id.clone(),
                reason: format!("purpose {:?} does not allow encryption", record.purpose),
            });
        }
        self.check_restrictions(record, KeyOperation::Encrypt, data_type)?;
        Ok(key)
    }

    /// Resolve and check the key named by an envelope.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyNotFound`] if the key does not exist.
    /// - [`CryptoError::KeyRevoked`] if the key has been revoked.
    /// - [`CryptoError::KeyRestricted`] if a restriction forbids the call.
    pub async fn key_for_decrypt(
        &self,
        key_id: &str,
        data_type: DataType,
    ) -> CryptoResult<Arc<LoadedKey>> {
        let key = self.load(key_id).await?;
        if !key.record.status.can_decrypt() {
            return Err(CryptoError::KeyRevoked(key.record.id.clone()));
        }
        self.check_restrictions(&key.record, KeyOperation::Decrypt, data_type)?;
        Ok(key)
    }

    /// Count one use of `key_id`. Counts are persisted by [`flush_usage`](Self::flush_usage).
    pub fn record_usage(&self, key_id: &str) {
        let now = self.clock.now();
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage
            .entry(key_id.to_owned())
            .and_modify(|d| {
                d.count += 1;
                d.last_used = now;
            })
            .or_insert(UsageDelta {
                count: 1,
                last_used: now,
            });
    }

    /// Persist buffered usage counts. Returns the number of records updated.
    ///
    /// Counts for records that fail to update are kept for the next flush.
    pub async fn flush_usage(&self) -> usize {
        let pending = std::mem::take(&mut *self.usage.lock().unwrap_or_else(PoisonError::into_inner));
        if pending.is_empty() {
            return 0;
        }

        let _guard = self.lifecycle.lock().await;
        let mut flushed = 0;
        let mut retry = Vec::new();
        for (id, delta) in pending {
            match self.apply_usage(&id, delta).await {
                Ok(true) => flushed += 1,
                Ok(false) => debug!(key_id = %id, "usage for unknown key dropped"),
                Err(e) => {
                    warn!(key_id = %id, error = %e, "usage flush failed");
                    retry.push((id, delta));
                }
            }
        }

        if !retry.is_empty() {
            let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
            for (id, delta) in retry {
                usage
                    .entry(id)
                    .and_modify(|d| {
                        d.count += delta.count;
                        d.last_used = d.last_used.max(delta.last_used);
                    })
                    .or_insert(delta);
            }
        }
        flushed
    }

    async fn apply_usage(&self, id: &str, delta: UsageDelta) -> CryptoResult<bool> {
        let Some(mut record) = self.with_timeout(self.store.get(id)).await? else {
            return Ok(false);
        };
        record.metadata.usage_count += delta.count;
        record.metadata.last_used = record.metadata.last_used.max(delta.last_used);
        self.with_timeout(self.store.put(&record)).await?;
        Ok(true)
    }

    /// Replace an active key with a fresh one of the same shape.
    ///
    /// The new key shares the old key's type, purpose, algorithm,
    /// restrictions, and modulus size, and carries the next version number.
    /// The old key becomes `deprecated` with `rotationScheduled` set; it can
    /// still decrypt everything it encrypted.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyNotFound`] if the key does not exist.
    /// - [`CryptoError::KeyRevoked`] if the key has been revoked.
    /// - [`CryptoError::InvalidKeyState`] if the key is no longer active.
    pub async fn rotate_key(&self, key_id: &str) -> CryptoResult<EncryptionKey> {
        let _guard = self.lifecycle.lock().await;

        let old = self.fetch_record(key_id).await?;
        match old.status {
            KeyStatus::Active => {}
            KeyStatus::Revoked => return Err(CryptoError::KeyRevoked(old.id)),
            status => {
                return Err(CryptoError::InvalidKeyState {
                    key_id: old.id,
                    status: status.to_string(),
                    reason: "only active keys can be rotated".into(),
                })
            }
        }

        let now = self.clock.now();
        let options = KeyOptions {
            algorithm: Some(old.algorithm()?),
            key_bits: old.metadata.modulus_bits,
            restrictions: old.restrictions.clone(),
        };
        let spec = KeySpec {
            key_type: old.key_type,
            purpose: old.purpose,
            options,
            version: old.metadata.version.saturating_add(1),
            now,
        };
        let (new, material) = generate::generate(spec, self.settings.rsa_modulus_bits).await?;

        self.with_timeout(self.store.put(&new)).await?;
        self.cache
            .insert(Arc::new(LoadedKey::new(new.clone(), material)))
            .await;
        self.set_active(new.key_type, new.purpose, Some(new.id.clone()));

        let old_id = old.id.clone();
        self.deprecate(old).await?;

        info!(
            old_key_id = %old_id,
            new_key_id = %new.id,
            version = new.metadata.version,
            "key rotated"
        );
        Ok(new)
    }

    /// Revoke a key. Revoking an already revoked key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotFound`] if the key does not exist, and
    /// propagates store failures.
    pub async fn revoke_key(&self, key_id: &str, reason: &str) -> CryptoResult<()> {
        let _guard = self.lifecycle.lock().await;

        let mut record = self.fetch_record(key_id).await?;
        if record.status == KeyStatus::Revoked {
            debug!(key_id, "key already revoked");
            return Ok(());
        }

        record.status = KeyStatus::Revoked;
        record.metadata.revoked_at = Some(self.clock.now());
        record.metadata.revocation_reason = Some(reason.to_owned());
        {
            let _fill = self.fill.write().await;
            self.with_timeout(self.store.put(&record)).await?;
            self.cache.remove(key_id).await;
        }
        if self.active_id(record.key_type, record.purpose).as_deref() == Some(key_id) {
            self.set_active(record.key_type, record.purpose, None);
        }

        info!(key_id, reason, "key revoked");
        Ok(())
    }

    /// Metadata for one key, read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotFound`] if the key does not exist.
    pub async fn get_key_info(&self, key_id: &str) -> CryptoResult<KeyInfo> {
        Ok(self.fetch_record(key_id).await?.info())
    }

    /// Metadata for every key, oldest first.
    pub async fn list_keys(&self) -> CryptoResult<Vec<KeyInfo>> {
        let mut records = self.with_timeout(self.store.list()).await?;
        records.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records.iter().map(EncryptionKey::info).collect())
    }

    /// Active keys older than the rotation period, one per `(type, purpose)`.
    ///
    /// Only the newest active key of each pair is considered; older active
    /// keys are superseded and get deprecated by the scan instead.
    pub async fn keys_due_for_rotation(&self) -> CryptoResult<Vec<EncryptionKey>> {
        let records = self.with_timeout(self.store.list()).await?;
        Ok(self.due_for_rotation(&records))
    }

    fn due_for_rotation(&self, records: &[EncryptionKey]) -> Vec<EncryptionKey> {
        let now = self.clock.now();
        let period = self.settings.rotation_period;
        newest_active(records)
            .into_values()
            .filter(|k| now - k.metadata.created_at >= period)
            .cloned()
            .collect()
    }

    /// Deprecate superseded active keys, then rotate every key that is due.
    /// A failed step is logged and the scan continues with the next key.
    ///
    /// # Errors
    ///
    /// Returns an error only if the initial listing of keys fails.
    pub async fn rotate_expired_keys(&self) -> CryptoResult<RotationReport> {
        let records = self.with_timeout(self.store.list()).await?;
        let newest = newest_active(&records);
        let superseded: Vec<KeyId> = records
            .iter()
            .filter(|r| r.status == KeyStatus::Active)
            .filter(|r| {
                newest
                    .get(&(r.key_type, r.purpose))
                    .is_some_and(|n| n.id != r.id)
            })
            .map(|r| r.id.clone())
            .collect();
        let due = self.due_for_rotation(&records);

        let mut report = RotationReport::default();
        for id in superseded {
            match self.deprecate_if_active(&id).await {
                Ok(true) => report.deprecated.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(key_id = %id, error = %e, "superseded key not deprecated");
                    report.failed.push(id);
                }
            }
        }
        for key in due {
            match self.rotate_key(&key.id).await {
                Ok(new) => report.rotated.push((key.id, new.id)),
                Err(e) => {
                    warn!(key_id = %key.id, error = %e, "key rotation failed");
                    report.failed.push(key.id);
                }
            }
        }
        if !report.rotated.is_empty() || !report.failed.is_empty() || !report.deprecated.is_empty()
        {
            info!(
                rotated = report.rotated.len(),
                deprecated = report.deprecated.len(),
                failed = report.failed.len(),
                "rotation scan finished"
            );
        }
        Ok(report)
    }

    async fn deprecate_if_active(&self, key_id: &str) -> CryptoResult<bool> {
        let _guard = self.lifecycle.lock().await;
        let record = self.fetch_record(key_id).await?;
        if record.status != KeyStatus::Active {
            return Ok(false);
        }
        if self.active_id(record.key_type, record.purpose).as_deref() == Some(key_id) {
            self.set_active(record.key_type, record.purpose, None);
        }
        self.deprecate(record).await?;
        Ok(true)
    }

    /// Deprecate every other active key of `current`'s pair. The caller holds
    /// the lifecycle lock.
    async fn retire_superseded(&self, current: &EncryptionKey) -> CryptoResult<()> {
        let records = self.with_timeout(self.store.list()).await?;
        for old in records.into_iter().filter(|r| {
            r.id != current.id
                && r.status == KeyStatus::Active
                && r.key_type == current.key_type
                && r.purpose == current.purpose
        }) {
            self.deprecate(old).await?;
        }
        Ok(())
    }

    /// Persist `record` as deprecated and drop it from the cache. The caller
    /// holds the lifecycle lock.
    async fn deprecate(&self, mut record: EncryptionKey) -> CryptoResult<()> {
        record.status = KeyStatus::Deprecated;
        record.metadata.rotation_scheduled = Some(self.clock.now());
        let _fill = self.fill.write().await;
        self.with_timeout(self.store.put(&record)).await?;
        self.cache.remove(&record.id).await;
        debug!(key_id = %record.id, "key deprecated");
        Ok(())
    }

    /// Load a key by id through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyNotFound`] if the key does not exist and
    /// [`CryptoError::Configuration`] if its stored material is unusable.
    pub async fn load(&self, key_id: &str) -> CryptoResult<Arc<LoadedKey>> {
        if let Some(hit) = self.cache.get(key_id).await {
            return Ok(hit);
        }
        let _fill = self.fill.read().await;
        let record = self.fetch_record(key_id).await?;
        let loaded = Arc::new(LoadedKey::from_record(record)?);
        self.cache.insert(Arc::clone(&loaded)).await;
        Ok(loaded)
    }

    async fn active_loaded(
        &self,
        key_type: KeyType,
        purpose: KeyPurpose,
    ) -> CryptoResult<Option<Arc<LoadedKey>>> {
        let indexed = self.active_id(key_type, purpose).is_some();
        if let Some(key) = self.active_from_index(key_type, purpose).await? {
            return Ok(Some(key));
        }
        // A miss against a recent listing is trusted; a stale entry is not.
        if !indexed && self.index_is_fresh() {
            return Ok(None);
        }

        // A listing taken while a rotation finishes can name a key that is
        // deprecated by the time it loads; the second listing sees its successor.
        for _ in 0..2 {
            let records = self.with_timeout(self.store.list()).await?;
            self.rebuild_index(&records);
            if let Some(key) = self.active_from_index(key_type, purpose).await? {
                return Ok(Some(key));
            }
            if self.active_id(key_type, purpose).is_none() {
                break;
            }
        }
        Ok(None)
    }

    async fn active_from_index(
        &self,
        key_type: KeyType,
        purpose: KeyPurpose,
    ) -> CryptoResult<Option<Arc<LoadedKey>>> {
        let Some(id) = self.active_id(key_type, purpose) else {
            return Ok(None);
        };
        match self.load(&id).await {
            Ok(key) if key.record.status == KeyStatus::Active => Ok(Some(key)),
            Ok(_) | Err(CryptoError::KeyNotFound(_)) => {
                self.cache.remove(&id).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn index_is_fresh(&self) -> bool {
        let refreshed = *self
            .index_refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        refreshed.is_some_and(|at| at.elapsed() < self.settings.index_refresh_interval)
    }

    fn active_id(&self, key_type: KeyType, purpose: KeyPurpose) -> Option<KeyId> {
        self.active.load().get(&(key_type, purpose)).cloned()
    }

    fn set_active(&self, key_type: KeyType, purpose: KeyPurpose, id: Option<KeyId>) {
        self.active.rcu(|current| {
            let mut next = ActiveIndex::clone(current);
            match &id {
                Some(id) => next.insert((key_type, purpose), id.clone()),
                None => next.remove(&(key_type, purpose)),
            };
            next
        });
    }

    /// Point each `(type, purpose)` at its newest active record.
    fn rebuild_index(&self, records: &[EncryptionKey]) {
        let index: ActiveIndex = newest_active(records)
            .into_iter()
            .map(|(pair, record)| (pair, record.id.clone()))
            .collect();
        self.active.store(Arc::new(index));
        *self
            .index_refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokio::time::Instant::now());
    }

    fn check_restrictions(
        &self,
        record: &EncryptionKey,
        op: KeyOperation,
        data_type: DataType,
    ) -> CryptoResult<()> {
        let Some(restrictions) = &record.restrictions else {
            return Ok(());
        };
        match restrictions.check(op, Some(data_type), self.clock.now()) {
            Some(reason) => Err(CryptoError::KeyRestricted {
                key_id: record.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn fetch_record(&self, key_id: &str) -> CryptoResult<EncryptionKey> {
        self.with_timeout(self.store.get(key_id))
            .await?
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_owned()))
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> CryptoResult<T> {
        let limit = self.settings.store_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(CryptoError::from),
            Err(_) => Err(CryptoError::Timeout(limit.as_millis() as u64)),
        }
    }
}

/// The newest active record of each `(type, purpose)` pair.
fn newest_active(records: &[EncryptionKey]) -> HashMap<(KeyType, KeyPurpose), &EncryptionKey> {
    let rank = |r: &EncryptionKey| (r.metadata.created_at, r.metadata.version, r.id.clone());
    let mut newest: HashMap<(KeyType, KeyPurpose), &EncryptionKey> = HashMap::new();
    for record in records.iter().filter(|r| r.status == KeyStatus::Active) {
        let slot = newest.entry((record.key_type, record.purpose)).or_insert(record);
        if rank(record) > rank(*slot) {
            *slot = record;
        }
    }
    newest
}
