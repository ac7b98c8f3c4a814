//! Redis window log storage.
//!
//! Each key holds a JSON array of admission timestamps in epoch milliseconds, with a
//! millisecond expiry. The atomic strategy runs the whole admission as one Lua script.

use std::future::Future;
use std::time::Duration;

use config::RedisConfig;
use redis::Script;

use super::redis_pool::{Pool, create_pool};
use super::{Admission, StorageError, WindowStore};
use crate::clock::millis;

const ADMIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local boundary = now - tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local kept = {}
local oldest = nil
local raw = redis.call('GET', KEYS[1])

if raw then
    for _, timestamp in ipairs(cjson.decode(raw)) do
        if timestamp > boundary then
            table.insert(kept, timestamp)
            if oldest == nil or timestamp < oldest then
                oldest = timestamp
            end
        end
    end
end

if #kept >= limit then
    return {0, #kept, oldest or now}
end

table.insert(kept, now)
redis.call('SET', KEYS[1], cjson.encode(kept), 'PX', ttl)

return {1, #kept, now}
"#;

/// Redis-backed window log storage, shared by every instance pointing at the same server.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
    admit_script: Script,
}

impl RedisStorage {
    /// Create a new Redis storage instance. Connections are opened lazily.
    pub fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
            admit_script: Script::new(ADMIT_SCRIPT),
        })
    }

    /// Checks that the server answers.
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

            Ok(())
        })
        .await
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<super::redis_pool::Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))
    }

    /// Bounds a whole operation, including waiting for a pooled connection.
    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.response_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.response_timeout)),
        }
    }
}

impl WindowStore for RedisStorage {
    async fn read(&self, key: &str) -> Result<Vec<u64>, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let raw = redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut *conn)
                .await
                .map_err(|e| StorageError::Query(format!("Failed to read window log '{key}': {e}")))?;

            match raw {
                Some(raw) => decode(&raw),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn write(&self, key: &str, timestamps: &[u64], ttl: Duration) -> Result<(), StorageError> {
        let key = self.key(key);
        let encoded = serde_json::to_string(timestamps).map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.bounded(async {
            let mut conn = self.connection().await?;

            redis::cmd("SET")
                .arg(&key)
                .arg(&encoded)
                .arg("PX")
                .arg(millis(ttl))
                .query_async::<()>(&mut *conn)
                .await
                .map_err(|e| StorageError::Query(format!("Failed to write window log '{key}': {e}")))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let removed = redis::cmd("DEL")
                .arg(&key)
                .query_async::<u64>(&mut *conn)
                .await
                .map_err(|e| StorageError::Query(format!("Failed to delete window log '{key}': {e}")))?;

            Ok(removed > 0)
        })
        .await
    }

    async fn admit_atomic(
        &self,
        key: &str,
        now: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<Admission, StorageError> {
        let key = self.key(key);

        self.bounded(async {
            let mut conn = self.connection().await?;

            let (admitted, count, oldest) = self
                .admit_script
                .key(&key)
                .arg(now)
                .arg(window_ms)
                .arg(limit)
                .arg(millis(ttl))
                .invoke_async::<(u8, u64, u64)>(&mut *conn)
                .await
                .map_err(|e| StorageError::Query(format!("Failed to run admission script for '{key}': {e}")))?;

            log::debug!("Admission script for '{key}' returned admitted={admitted}, count={count}");

            if admitted == 1 {
                Ok(Admission::Admitted {
                    count: usize::try_from(count).unwrap_or(usize::MAX),
                })
            } else {
                Ok(Admission::Rejected { oldest })
            }
        })
        .await
    }
}

/// Decodes a stored log. Lua's cjson may write integral numbers in float notation, so
/// entries are read as floats.
fn decode(raw: &str) -> Result<Vec<u64>, StorageError> {
    let entries: Vec<f64> =
        serde_json::from_str(raw).map_err(|e| StorageError::Serialization(format!("{e}: {raw}")))?;

    Ok(entries.into_iter().map(|entry| entry as u64).collect())
}
