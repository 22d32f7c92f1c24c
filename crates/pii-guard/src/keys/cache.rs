//! [`KeyCache`]: bounded, least-recently-used cache of decoded key material.

use std::{collections::HashMap, sync::Arc};

use common::KeyId;
use tokio::sync::Mutex;

use super::material::LoadedKey;

/// Bounded read-through cache in front of the key store, keyed by key id.
///
/// Every hit refreshes an entry's recency; inserting into a full cache evicts
/// the least recently used entry. Capacity is small (hundreds of keys), so the
/// linear eviction scan is cheaper than maintaining a separate ordering.
#[derive(Debug)]
pub struct KeyCache {
    capacity: usize,
    inner: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<KeyId, Entry>,
    tick: u64,
}

#[derive(Debug)]
struct Entry {
    key: Arc<LoadedKey>,
    last_access: u64,
}

impl KeyCache {
    /// Create an empty cache holding at most `capacity` keys (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheState::default()),
        }
    }

    /// Look up a key, marking it as most recently used.
    pub async fn get(&self, id: &str) -> Option<Arc<LoadedKey>> {
        let mut state = self.inner.lock().await;
        state.tick += 1;
        let tick = state.tick;
        state.entries.get_mut(id).map(|entry| {
            entry.last_access = tick;
            Arc::clone(&entry.key)
        })
    }

    /// Insert or replace a key, evicting the least recently used entry if full.
    pub async fn insert(&self, key: Arc<LoadedKey>) {
        let mut state = self.inner.lock().await;
        state.tick += 1;
        let tick = state.tick;
        let id = key.record.id.clone();

        if !state.entries.contains_key(&id) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }
        state.entries.insert(
            id,
            Entry {
                key,
                last_access: tick,
            },
        );
    }

    /// Drop a key so the next lookup re-reads it from the store.
    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.entries.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
