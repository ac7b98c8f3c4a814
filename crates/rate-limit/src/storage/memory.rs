//! In-memory window log storage using mini-moka.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use mini_moka::sync::Cache;
use tokio::sync::Mutex;

use super::{Admission, StorageError, WindowStore, decide};

#[derive(Debug, Clone)]
struct StoredWindow {
    timestamps: Vec<u64>,
    expires_at: Instant,
}

/// Process-local window log storage.
///
/// Every record carries its own expiry. The cache-wide time to live is only a ceiling
/// that evicts records nobody touches again.
pub struct InMemoryStorage {
    records: Cache<String, StoredWindow>,
    /// Serializes atomic admissions per key. Entries are removed once no task holds them.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new(max_capacity: u64, time_to_live: Duration) -> Self {
        let records = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(time_to_live)
            .build();

        Self {
            records,
            key_locks: DashMap::new(),
        }
    }

    fn load(&self, key: &str) -> Vec<u64> {
        let key = key.to_string();

        match self.records.get(&key) {
            Some(record) if record.expires_at > Instant::now() => record.timestamps,
            Some(_) => {
                self.records.invalidate(&key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn store(&self, key: &str, timestamps: Vec<u64>, ttl: Duration) {
        let record = StoredWindow {
            timestamps,
            expires_at: Instant::now() + ttl,
        };

        self.records.insert(key.to_string(), record);
    }
}

impl WindowStore for InMemoryStorage {
    async fn read(&self, key: &str) -> Result<Vec<u64>, StorageError> {
        Ok(self.load(key))
    }

    async fn write(&self, key: &str, timestamps: &[u64], ttl: Duration) -> Result<(), StorageError> {
        self.store(key, timestamps.to_vec(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();

        let existed = self
            .records
            .get(&key)
            .is_some_and(|record| record.expires_at > Instant::now());

        self.records.invalidate(&key);

        Ok(existed)
    }

    async fn admit_atomic(
        &self,
        key: &str,
        now: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<Admission, StorageError> {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock().await;

        let (admission, updated) = decide(self.load(key), now, window_ms, limit);

        if let Some(timestamps) = updated {
            self.store(key, timestamps, ttl);
        }

        drop(guard);

        // Two references left means only the map and this task know about the lock.
        self.key_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 2);

        Ok(admission)
    }
}
