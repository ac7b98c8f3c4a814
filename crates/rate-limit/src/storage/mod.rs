//! Storage backends for sliding window logs.
//!
//! A window log is the list of admission timestamps (epoch milliseconds) for one
//! `<identifier>:<category>[:burst]` key. Backends only store and expire logs; the window
//! arithmetic lives in [`decide`] and, for Redis, in the atomic admission script.

use std::future::Future;
use std::time::Duration;

use config::{RateLimitConfig, StorageConfig};

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use redis::RedisStorage;

/// What a single admission attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded; `count` includes it.
    Admitted {
        /// Entries in the window after recording.
        count: usize,
    },
    /// The window is full. Nothing was recorded.
    Rejected {
        /// Oldest entry still inside the window.
        oldest: u64,
    },
}

/// Trait for window log storage backends.
pub trait WindowStore: Send + Sync {
    /// Reads the stored log for a key. A missing or expired key reads as empty.
    fn read(&self, key: &str) -> impl Future<Output = Result<Vec<u64>, StorageError>> + Send;

    /// Replaces the log for a key, expiring it after `ttl`.
    fn write(&self, key: &str, timestamps: &[u64], ttl: Duration) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Removes a key, returning whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Prunes, checks and records as one indivisible step, so concurrent callers on the
    /// same key cannot both take the last slot.
    fn admit_atomic(
        &self,
        key: &str,
        now: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> impl Future<Output = Result<Admission, StorageError>> + Send;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Storage query error: {0}")]
    Query(String),

    /// The backend did not answer in time.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored window log could not be decoded.
    #[error("Corrupt window log: {0}")]
    Serialization(String),
}

/// The configured storage backend.
pub enum Storage {
    /// Process-local storage.
    Memory(InMemoryStorage),
    /// Shared Redis storage.
    Redis(RedisStorage),
}

impl Storage {
    /// Opens the configured backend. Window logs never need to outlive `ttl_ceiling`.
    ///
    /// An unreachable Redis server is logged and tolerated, so that failing open keeps
    /// serving until it comes back.
    pub async fn from_config(config: &RateLimitConfig, ttl_ceiling: Duration) -> Result<Self, StorageError> {
        match &config.storage {
            StorageConfig::Memory(memory) => {
                log::debug!(
                    "Using in-memory rate limit storage with capacity {} and TTL ceiling {ttl_ceiling:?}",
                    memory.max_capacity
                );

                Ok(Storage::Memory(InMemoryStorage::new(memory.max_capacity, ttl_ceiling)))
            }
            StorageConfig::Redis(redis) => {
                log::debug!("Using Redis rate limit storage with key prefix '{}'", redis.key_prefix);

                let storage = RedisStorage::new(redis)?;

                if let Err(e) = storage.ping().await {
                    log::warn!("Redis rate limit storage is not reachable yet: {e}");
                }

                Ok(Storage::Redis(storage))
            }
        }
    }
}

impl WindowStore for Storage {
    async fn read(&self, key: &str) -> Result<Vec<u64>, StorageError> {
        match self {
            Storage::Memory(storage) => storage.read(key).await,
            Storage::Redis(storage) => storage.read(key).await,
        }
    }

    async fn write(&self, key: &str, timestamps: &[u64], ttl: Duration) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.write(key, timestamps, ttl).await,
            Storage::Redis(storage) => storage.write(key, timestamps, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(storage) => storage.delete(key).await,
            Storage::Redis(storage) => storage.delete(key).await,
        }
    }

    async fn admit_atomic(
        &self,
        key: &str,
        now: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<Admission, StorageError> {
        match self {
            Storage::Memory(storage) => storage.admit_atomic(key, now, window_ms, limit, ttl).await,
            Storage::Redis(storage) => storage.admit_atomic(key, now, window_ms, limit, ttl).await,
        }
    }
}

/// Drops entries at or before `now - window_ms`. Entries from clocks running slightly
/// ahead are kept.
pub(crate) fn prune(timestamps: Vec<u64>, now: u64, window_ms: u64) -> Vec<u64> {
    let boundary = now.saturating_sub(window_ms);
    timestamps.into_iter().filter(|&timestamp| timestamp > boundary).collect()
}

/// Applies one admission attempt to a stored log. Returns the decision and, when
/// admitted, the log to persist.
pub(crate) fn decide(stored: Vec<u64>, now: u64, window_ms: u64, limit: u32) -> (Admission, Option<Vec<u64>>) {
    let mut timestamps = prune(stored, now, window_ms);

    if timestamps.len() >= limit as usize {
        let oldest = timestamps.iter().copied().min().unwrap_or(now);
        return (Admission::Rejected { oldest }, None);
    }

    timestamps.push(now);
    let count = timestamps.len();

    (Admission::Admitted { count }, Some(timestamps))
}
