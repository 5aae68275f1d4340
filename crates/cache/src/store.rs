//! Durable store contract and the two bundled backends

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use oracle_core::StoreResult;

use crate::entry::CacheEntry;

/// Key-value store behind the durable tier.
///
/// `store` may buffer; `flush` makes everything stored so far durable.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    async fn store(&self, key: &str, entry: &CacheEntry) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    async fn clear(&self) -> StoreResult<()>;

    async fn flush(&self) -> StoreResult<()>;
}

/// Process-local store, useful when durability is not needed and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    flushes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn store(&self, key: &str, entry: &CacheEntry) -> StoreResult<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries.clear();
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Snapshot store: entries live in memory and each flush rewrites one JSON
/// file (written to a temp file, then renamed over the old snapshot).
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl JsonFileStore {
    /// Open a snapshot, starting empty if the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Opened durable snapshot {} ({} entries)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl DurableStore for JsonFileStore {
    async fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, entry: &CacheEntry) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        let bytes = {
            let entries = self.entries.lock();
            serde_json::to_vec_pretty(&*entries)?
        };

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Flushed durable snapshot to {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use oracle_core::StoreError;
    use std::sync::atomic::AtomicBool;

    /// Store whose flush fails while `broken` is set
    #[derive(Default)]
    pub struct FlakyStore {
        pub inner: MemoryStore,
        pub broken: AtomicBool,
        attempts: AtomicU64,
    }

    impl FlakyStore {
        pub fn broken() -> Self {
            let store = Self::default();
            store.broken.store(true, Ordering::SeqCst);
            store
        }

        pub fn flush_attempts(&self) -> u64 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DurableStore for FlakyStore {
        async fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
            self.inner.load(key).await
        }

        async fn store(&self, key: &str, entry: &CacheEntry) -> StoreResult<()> {
            self.inner.store(key, entry).await
        }

        async fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key).await
        }

        async fn clear(&self) -> StoreResult<()> {
            self.inner.clear().await
        }

        async fn flush(&self) -> StoreResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.flush().await
        }
    }
}
