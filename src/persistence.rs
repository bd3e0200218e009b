//! Persistence Bridge
//!
//! Partializes store state into a fixed-policy projection, writes it through
//! a `StorageBackend`, and rehydrates it back, pruning at both boundaries
//! (spec §4.6). The teacher has no persistence layer of its own; this is
//! grounded on the key/value adapter shape used throughout the cache-adapter
//! corner of this domain (`hack-ink-jwks-cache`'s `CacheManager`, which
//! wraps a swappable backend behind `store`/`retrieve`-style async methods).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::CacheTable;
use crate::error::{Error, Result};
use crate::store::{QueryState, Status};

/// A named key/value slot. The engine never assumes anything about the
/// underlying medium beyond these five operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn store(&self, key: &str, value: &str) -> Result<()>;
    async fn retrieve(&self, key: &str) -> Result<Option<String>>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn list_keys(&self) -> Result<Vec<String>>;
    async fn clear(&self) -> Result<()>;
}

/// In-process backend: the zero-config default, used in tests.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.data.lock().clear();
        Ok(())
    }
}

/// Native filesystem backend: one JSON file per storage slot under a base
/// directory.
#[cfg(feature = "native")]
pub struct FileBackend {
    base_dir: std::path::PathBuf,
}

#[cfg(feature = "native")]
impl FileBackend {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

#[cfg(feature = "native")]
#[async_trait]
impl StorageBackend for FileBackend {
    async fn store(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(Error::from(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        for key in self.list_keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}

/// Browser `localStorage` backend.
#[cfg(feature = "wasm")]
pub struct LocalStorageBackend;

#[cfg(feature = "wasm")]
impl LocalStorageBackend {
    pub fn new() -> Self {
        Self
    }

    fn storage() -> Result<web_sys::Storage> {
        web_sys::window()
            .and_then(|w| w.local_storage().ok().flatten())
            .ok_or_else(|| Error::storage("localStorage unavailable"))
    }
}

#[cfg(feature = "wasm")]
#[async_trait(?Send)]
impl StorageBackend for LocalStorageBackend {
    async fn store(&self, key: &str, value: &str) -> Result<()> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|_| Error::storage("localStorage.setItem failed"))
    }

    async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        Self::storage()?
            .get_item(key)
            .map_err(|_| Error::storage("localStorage.getItem failed"))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        Self::storage()?
            .remove_item(key)
            .map_err(|_| Error::storage("localStorage.removeItem failed"))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let storage = Self::storage()?;
        let len = storage.length().unwrap_or(0);
        let mut keys = Vec::with_capacity(len as usize);
        for i in 0..len {
            if let Ok(Some(key)) = storage.key(i) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        Self::storage()?.clear().map_err(|_| Error::storage("localStorage.clear failed"))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
enum PersistedStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl From<Status> for PersistedStatus {
    fn from(s: Status) -> Self {
        match s {
            Status::Idle => PersistedStatus::Idle,
            Status::Loading => PersistedStatus::Loading,
            Status::Success => PersistedStatus::Success,
            Status::Error => PersistedStatus::Error,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry<D> {
    cache_time_ms: u64,
    data: Option<D>,
    /// Milliseconds elapsed between the entry's `lastFetchedAt` and the
    /// moment of persisting. `Instant` has no stable cross-process meaning,
    /// so age (not the instant itself) is what's serialized; rehydration
    /// reconstructs a fresh `Instant` as `now - age`.
    age_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct PersistedState<D> {
    enabled: bool,
    query_key: String,
    status: PersistedStatus,
    error: Option<String>,
    last_fetched_at_age_ms: Option<u64>,
    query_cache: HashMap<String, PersistedEntry<D>>,
    user: Option<serde_json::Value>,
}

/// What `rehydrate` hands back: the restored cache/state fields, ready to
/// seed a freshly constructed `QueryState`. Transient coordinator fields
/// (`activeAbortHandle`, `activeFetch`, `activeRefetchTimer`, `lastFetchKey`)
/// are never part of this — they stay at their initial values (spec §4.6).
pub struct RehydratedState<D> {
    pub enabled: bool,
    pub query_key: String,
    pub status: Status,
    pub error: Option<Error>,
    pub last_fetched_at: Option<Instant>,
    pub query_cache: CacheTable<D>,
    pub user: Option<serde_json::Value>,
}

/// Bridges a `QueryState<D>` to a `StorageBackend` slot.
pub struct PersistenceBridge<D> {
    backend: Arc<dyn StorageBackend>,
    storage_key: String,
    partialize: Option<Arc<dyn Fn(&QueryState<D>) -> serde_json::Value + Send + Sync>>,
    _marker: PhantomData<D>,
}

impl<D> PersistenceBridge<D>
where
    D: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(backend: Arc<dyn StorageBackend>, storage_key: impl Into<String>) -> Self {
        Self {
            backend,
            storage_key: storage_key.into(),
            partialize: None,
            _marker: PhantomData,
        }
    }

    pub fn with_partialize(
        mut self,
        f: impl Fn(&QueryState<D>) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.partialize = Some(Arc::new(f));
        self
    }

    /// Write the partialized projection of `state`. Entries with no
    /// successful fetch (error-only entries) are not persisted — there is no
    /// stable cross-process representation of `Error`, and an error-only
    /// entry carries no data worth restoring. Expired entries (other than
    /// the current key) are dropped at the boundary, so rehydration never
    /// resurrects stale data (spec §4.6/§9).
    #[tracing::instrument(skip(self, state), fields(storage_key = %self.storage_key))]
    pub async fn persist(&self, state: &QueryState<D>, now: Instant) -> Result<()> {
        let mut query_cache = HashMap::new();
        for (key, entry) in state.query_cache.iter() {
            let Some(last_fetched_at) = entry.last_fetched_at else { continue };
            if key != &state.query_key && entry.is_expired(now) {
                continue;
            }
            query_cache.insert(
                key.clone(),
                PersistedEntry {
                    cache_time_ms: entry.cache_time.as_millis() as u64,
                    data: entry.data.clone(),
                    age_ms: now.duration_since(last_fetched_at).as_millis() as u64,
                },
            );
        }

        let persisted = PersistedState {
            enabled: state.enabled,
            query_key: state.query_key.clone(),
            status: state.status.into(),
            error: state.error.as_ref().map(|e| e.to_string()),
            last_fetched_at_age_ms: state
                .last_fetched_at
                .map(|ts| now.duration_since(ts).as_millis() as u64),
            query_cache,
            user: self.partialize.as_ref().map(|f| f(state)),
        };

        let json = serde_json::to_string(&persisted)?;
        tracing::debug!(bytes = json.len(), "persisted query state");
        self.backend.store(&self.storage_key, &json).await
    }

    /// Read back the projection, reconstructing `Instant`s relative to
    /// `now`. A `status == Loading` snapshot is normalized to `Idle` on
    /// rehydrate: no in-flight fetch survives a process restart, so a stuck
    /// "loading" forever would be worse than losing that detail. Every other
    /// status, and the error message alongside an `Error` status, round-trips
    /// as persisted.
    #[tracing::instrument(skip(self), fields(storage_key = %self.storage_key))]
    pub async fn rehydrate(&self, now: Instant) -> Result<Option<RehydratedState<D>>> {
        let Some(json) = self.backend.retrieve(&self.storage_key).await? else {
            return Ok(None);
        };
        let persisted: PersistedState<D> = serde_json::from_str(&json)?;

        let mut query_cache = CacheTable::default();
        for (key, entry) in persisted.query_cache {
            let synthetic_ts = now - Duration::from_millis(entry.age_ms);
            query_cache.record_success(&key, entry.data, Duration::from_millis(entry.cache_time_ms), synthetic_ts);
        }

        let status = match persisted.status {
            PersistedStatus::Loading => Status::Idle,
            PersistedStatus::Idle => Status::Idle,
            PersistedStatus::Success => Status::Success,
            PersistedStatus::Error => Status::Error,
        };
        let error = if status == Status::Error {
            persisted.error.map(Error::fetcher)
        } else {
            None
        };

        Ok(Some(RehydratedState {
            enabled: persisted.enabled,
            query_key: persisted.query_key,
            status,
            error,
            last_fetched_at: persisted
                .last_fetched_at_age_ms
                .map(|age_ms| now - Duration::from_millis(age_ms)),
            query_cache,
            user: persisted.user,
        }))
    }
}
