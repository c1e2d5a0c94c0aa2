//! Promise storage.
//!
//! Promises are keyed by `(channel_id, agreement_id)`. A stored record
//! may only be replaced by one that strictly extends it: the revealed
//! flag never goes back to `false` and the promised amount never
//! shrinks. Rejected overwrites are reported with a dedicated error the
//! promise handler treats as benign.

use crate::payment::promise::HermesPromise;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors returned by promise storage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The incoming record does not extend the stored one. Benign: the
    /// promise handler swallows this.
    #[error("attempt to overwrite a stored promise")]
    AttemptToOverwrite,

    /// Backing-store failure.
    #[error("promise storage failure: {0}")]
    Backend(String),
}

/// Key-addressed store of hermes promises.
pub trait PromiseStorage: Send + Sync {
    /// Persist a promise under `(channel_id, agreement_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AttemptToOverwrite`] when the record does
    /// not extend the stored one, or a backend error.
    fn store(&self, promise: HermesPromise) -> std::result::Result<(), StorageError>;

    /// Look up a promise by key.
    fn get(&self, channel_id: &str, agreement_id: u64) -> Option<HermesPromise>;
}

/// In-memory promise store with optional disk persistence.
#[derive(Debug, Default)]
pub struct MemoryPromiseStorage {
    inner: RwLock<HashMap<(String, u64), HermesPromise>>,
    persist_path: Option<PathBuf>,
}

impl MemoryPromiseStorage {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store persisting each accepted record to `path`.
    ///
    /// Existing records at `path` are loaded back first.
    #[must_use]
    pub fn with_persistence(path: &Path) -> Self {
        let storage = Self {
            inner: RwLock::new(HashMap::new()),
            persist_path: Some(path.to_path_buf()),
        };

        if let Some(loaded) = Self::load_from_disk(path) {
            let count = loaded.len();
            let mut map = storage.inner.write();
            for promise in loaded {
                map.insert((promise.channel_id.clone(), promise.agreement_id), promise);
            }
            drop(map);
            info!("Loaded {} persisted hermes promises", count);
        }

        storage
    }

    /// Number of stored promises.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn persist(&self) {
        if let Some(ref path) = self.persist_path {
            let records: Vec<HermesPromise> = self.inner.read().values().cloned().collect();
            if let Ok(bytes) = rmp_serde::to_vec(&records) {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("Failed to persist hermes promises: {}", e);
                }
            }
        }
    }

    fn load_from_disk(path: &Path) -> Option<Vec<HermesPromise>> {
        let bytes = std::fs::read(path).ok()?;
        rmp_serde::from_slice(&bytes).ok()
    }
}

impl PromiseStorage for MemoryPromiseStorage {
    fn store(&self, promise: HermesPromise) -> std::result::Result<(), StorageError> {
        {
            let mut map = self.inner.write();
            let key = (promise.channel_id.clone(), promise.agreement_id);

            if let Some(existing) = map.get(&key) {
                let downgrades_reveal = existing.revealed && !promise.revealed;
                let shrinks_amount = promise.promise.amount < existing.promise.amount;
                let extends = (promise.revealed && !existing.revealed)
                    || promise.promise.amount > existing.promise.amount;
                if downgrades_reveal || shrinks_amount || !extends {
                    return Err(StorageError::AttemptToOverwrite);
                }
            }

            map.insert(key, promise);
        }

        self.persist();
        Ok(())
    }

    fn get(&self, channel_id: &str, agreement_id: u64) -> Option<HermesPromise> {
        self.inner
            .read()
            .get(&(channel_id.to_string(), agreement_id))
            .cloned()
    }
}
